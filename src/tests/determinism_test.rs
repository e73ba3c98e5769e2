//! Deterministic reproduction
//!
//! Two runs over byte-identical inputs and configuration must produce
//! byte-identical CSV summaries and numerically identical result fields.

use super::common;
use crate::config::AnalysisConfig;
use crate::services::analysis::workflow::{self, PipelineOutput, RunContext};
use crate::services::analysis::render;
use std::path::Path;

fn run_once(csv: &str) -> (tempfile::TempDir, PipelineOutput) {
    let dir = tempfile::tempdir().unwrap();
    let cohort_path = common::write_cohort(dir.path(), csv);
    let output_dir = dir.path().join("outputs");
    std::fs::create_dir_all(&output_dir).unwrap();

    let config = AnalysisConfig::default();
    let ctx = RunContext {
        trial_id: "NCT03389555",
        medication: "hydrocortisone",
        cohort_path: &cohort_path,
        output_dir: &output_dir,
        config: &config,
        llm: None,
        progress: None,
    };
    let output = workflow::run(&ctx).expect("pipeline completes");
    (dir, output)
}

fn read_artifact(dir: &Path, name: &str) -> Vec<u8> {
    std::fs::read(dir.join("outputs").join(name)).unwrap()
}

#[test]
fn identical_inputs_reproduce_identical_outputs() {
    let csv = common::confounded_cohort(800, 250, 101);

    let (dir_a, out_a) = run_once(&csv);
    let (dir_b, out_b) = run_once(&csv);

    // CSV and text artifacts byte for byte
    let method = out_a.selection.as_ref().unwrap().selected_method;
    for name in [
        render::SURVIVAL_SUMMARY_FILE.to_string(),
        render::BALANCE_CSV_FILE.to_string(),
        render::METHOD_COMPARISON_FILE.to_string(),
        render::SELECTION_REASONING_FILE.to_string(),
        render::BASELINE_TABLE_FILE.to_string(),
        render::matched_data_filename(method),
    ] {
        assert_eq!(
            read_artifact(dir_a.path(), &name),
            read_artifact(dir_b.path(), &name),
            "artifact {name} differs between identical runs"
        );
    }

    // numeric result fields
    assert_eq!(
        out_a.selection.as_ref().unwrap().selected_method,
        out_b.selection.as_ref().unwrap().selected_method
    );
    let (surv_a, surv_b) = (out_a.survival.unwrap(), out_b.survival.unwrap());
    assert!((surv_a.hazard_ratio - surv_b.hazard_ratio).abs() < 1e-10);
    assert!((surv_a.p_value - surv_b.p_value).abs() < 1e-10);
    assert!((surv_a.concordance_index - surv_b.concordance_index).abs() < 1e-10);

    let (cate_a, cate_b) = (out_a.heterogeneity.unwrap(), out_b.heterogeneity.unwrap());
    assert!((cate_a.ate - cate_b.ate).abs() < 1e-10);
    assert_eq!(cate_a.cate_per_unit.len(), cate_b.cate_per_unit.len());
    for (a, b) in cate_a.cate_per_unit.iter().zip(cate_b.cate_per_unit.iter()) {
        match (a, b) {
            (Some(a), Some(b)) => assert!((a - b).abs() < 1e-10),
            (None, None) => {},
            _ => panic!("CATE availability differs between runs"),
        }
    }

    for ((name_a, imp_a), (name_b, imp_b)) in cate_a
        .feature_importances
        .iter()
        .zip(cate_b.feature_importances.iter())
    {
        assert_eq!(name_a, name_b);
        assert!((imp_a - imp_b).abs() < 1e-10);
    }
}
