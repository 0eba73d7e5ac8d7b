pub mod lineage;
pub mod run;
