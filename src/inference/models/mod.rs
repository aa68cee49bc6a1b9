pub mod flan_t5;
pub mod model;
