pub mod document;
pub mod evaluator;
pub mod report;
pub mod runner;
pub mod scenario;
