pub mod benchmark;
pub mod config;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod layout;
pub mod outcome;
pub mod report;
pub mod solver;
pub mod statistics;
