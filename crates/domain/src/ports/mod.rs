use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod applications;
pub mod db;
pub mod milestones;
pub mod notifications;
pub mod programs;
