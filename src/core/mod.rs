pub mod clock;
pub mod shared;
