pub mod runservice;
