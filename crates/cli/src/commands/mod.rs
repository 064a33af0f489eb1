pub mod ask;
pub mod onboard;
