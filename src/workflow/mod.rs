pub mod apply;
pub mod external;
pub mod generate;
pub mod parser;
pub mod prompt;
pub mod publish;
pub mod repository;
pub mod retry;
pub mod run;
#[cfg(test)]
pub mod testing;
