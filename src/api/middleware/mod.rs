pub mod faults;
pub mod session;
