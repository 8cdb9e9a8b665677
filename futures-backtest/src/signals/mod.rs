pub mod evaluator;

pub use evaluator::SignalEvaluator;
