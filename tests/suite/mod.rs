mod concurrency;
mod failures;
mod lifecycle;
