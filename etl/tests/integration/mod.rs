mod batch_fallback_test;
mod write_pipeline_test;
