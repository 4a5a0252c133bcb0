pub mod build_log;
pub mod canon;
mod densemap;
mod depfile;
pub mod deps_log;
pub mod dyndep;
pub mod dyndep_parser;
pub mod eval;
mod explain;
pub mod fs;
pub mod graph;
pub mod hash;
pub mod implicit;
pub mod missing_deps;
pub mod run;
pub mod scan;
pub mod scanner;
mod smallmap;
pub mod trace;
