pub mod ast;
pub mod cli;
pub mod environment;
pub mod error;
pub mod loop_manager;
pub mod module;
pub mod output;
pub mod parser;
pub mod repl;
pub mod runtime;
pub mod stdlib;
pub mod tokenizer;
pub mod value;
