pub mod evaluator;
pub mod supervisor;
pub mod worker;
