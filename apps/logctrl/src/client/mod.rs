pub mod layout;
pub mod viewer;
