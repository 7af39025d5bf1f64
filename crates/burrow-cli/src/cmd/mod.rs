pub(crate) mod delete;
pub(crate) mod merge;
pub(crate) mod set_status;
pub(crate) mod show;
pub(crate) mod validate;
