pub mod detection;
pub mod model;
pub mod tasks;
pub mod translator;
