pub mod booking;
pub mod invoice;
pub mod locks;
pub mod pricing;
pub mod scheduling;
pub mod sweeper;
