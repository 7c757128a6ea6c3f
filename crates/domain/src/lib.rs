pub mod applications;
pub mod error;
pub mod events;
pub mod identity;
pub mod milestones;
pub mod notifications;
pub mod ports;
pub mod programs;
pub mod scope;
pub mod util;
pub mod visibility;

pub type DomainResult<T> = Result<T, error::DomainError>;
