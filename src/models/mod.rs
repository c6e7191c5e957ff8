pub mod customer;
pub mod service;
