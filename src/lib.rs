pub mod api;
pub mod bridge;
pub mod config;
pub mod convergence;
pub mod detector;
pub mod element;
pub mod finder;
pub mod history;
pub mod llm;
pub mod ocr;
pub mod profile;
pub mod resolver;
pub mod rules;
pub mod scanner;
pub mod sender;
pub mod snapshot;
pub mod state;
pub mod uidump;

#[cfg(test)]
pub(crate) mod testing;
