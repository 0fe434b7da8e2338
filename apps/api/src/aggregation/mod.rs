// Hybrid result aggregation: pagination, availability probing, merging and
// response assembly over the record store and the prediction service.

pub mod assembler;
pub mod enrichment;
pub mod merge;
pub mod pagination;
pub mod probe;
