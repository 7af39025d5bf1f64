pub mod delete;
pub mod merge;
pub mod set_status;
pub mod show;
pub mod util;
pub mod validate;
