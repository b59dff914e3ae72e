pub mod diagnostics;
pub mod pump;
