pub mod alert;
pub mod annotate;
pub mod danger;
pub mod region;
pub mod view;
