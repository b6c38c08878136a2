use std::fs;
use std::path::Path;

use argqual_harness::agreement::perfect::perfect_subset;
use argqual_harness::ratings::{PromptVariant, Score};
use argqual_harness::store::write_jsonl;
use argqual_harness::taxonomy::{
    ARRANGEMENT, CLARITY, COGENCY, LOCAL_ACCEPTABILITY, LOCAL_RELEVANCE, LOCAL_SUFFICIENCY, OVERALL_QUALITY,
};
use argqual_harness::{
    ordinal_alpha, AgreementEngine, AnnotatorConfig, DirectoryRatingSource, ExclusionSet,
    MemoryRatingSource, RatingRecord, ReliabilityMatrix, Taxonomy, Verdict,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn score(rank: u8) -> Option<Verdict> {
    Score::from_rank(rank).map(Verdict::Score)
}

fn record(id: &str, dim: &str, rank: u8) -> RatingRecord {
    RatingRecord::new(id, dim, score(rank))
}

fn engine() -> AgreementEngine {
    AgreementEngine::new(Taxonomy::argument_quality(), ExclusionSet::reference())
}

fn write_replicate(dir: &Path, name: &str, records: &[RatingRecord]) {
    write_jsonl(dir.join(name), records).unwrap();
}

#[test]
fn identical_replicates_agree_perfectly() {
    let config = AnnotatorConfig::new("human", PromptVariant::Novice);
    let ratings: Vec<RatingRecord> = (0..12)
        .map(|i| record(&format!("arg{i}"), CLARITY, (i % 3 + 1) as u8))
        .collect();
    let mut source = MemoryRatingSource::new();
    source.insert(&config, vec![ratings.clone(), ratings.clone(), ratings]);

    let report = engine().alphas(&source, &[config]).unwrap();
    assert_eq!(report.annotators.len(), 3);
    assert_eq!(report.alpha(CLARITY), Some(1.0));
    assert_eq!(report.across_dimensions, Some(1.0));
    // Nothing was rated on Cogency's children, so it stays undefined.
    assert_eq!(report.alpha(COGENCY), None);
}

#[test]
fn uniform_random_ratings_are_near_zero() {
    let mut rng = StdRng::seed_from_u64(7);
    let config = AnnotatorConfig::new("noise", PromptVariant::Expert);
    let replicates: Vec<Vec<RatingRecord>> = (0..2)
        .map(|_| {
            (0..2000)
                .map(|i| record(&format!("item{i}"), CLARITY, rng.gen_range(1..=3)))
                .collect()
        })
        .collect();
    let mut source = MemoryRatingSource::new();
    source.insert(&config, replicates);

    let engine = AgreementEngine::new(Taxonomy::argument_quality(), ExclusionSet::empty());
    let alpha = engine.alphas(&source, &[config]).unwrap().alpha(CLARITY).unwrap();
    assert!(alpha.abs() < 0.08, "alpha = {alpha}");
}

#[test]
fn excluded_items_never_reach_a_matrix() {
    let config = AnnotatorConfig::new("human", PromptVariant::Expert);
    let agreeing = vec![record("arg1", CLARITY, 3), record("arg2", CLARITY, 1)];
    let mut first = agreeing.clone();
    let mut second = agreeing;
    // Maximal disagreement on an excluded item.
    first.push(record("arg155750", CLARITY, 1));
    second.push(record("arg155750", CLARITY, 3));

    let mut source = MemoryRatingSource::new();
    source.insert(&config, vec![first, second]);

    let engine = engine();
    let tables = engine.replicate_tables(&source, &config).unwrap();
    let matrix = ReliabilityMatrix::for_dimension(&tables, CLARITY, engine.exclusions());
    assert!(matrix.units().iter().all(|u| u != "arg155750"));
    assert_eq!(ordinal_alpha(&matrix), Ok(1.0));
}

#[test]
fn derived_dimensions_follow_rounded_means() {
    let config = AnnotatorConfig::new("human", PromptVariant::Expert);
    let records = vec![
        record("arg1", LOCAL_ACCEPTABILITY, 3),
        record("arg1", LOCAL_RELEVANCE, 2),
        record("arg1", LOCAL_SUFFICIENCY, 1),
        record("arg2", LOCAL_ACCEPTABILITY, 3),
        record("arg2", LOCAL_RELEVANCE, 3),
        RatingRecord::new("arg2", LOCAL_SUFFICIENCY, Some(Verdict::CannotJudge)),
    ];
    let mut source = MemoryRatingSource::new();
    source.insert(&config, vec![records]);

    let tables = engine().replicate_tables(&source, &config).unwrap();
    assert_eq!(tables[0].score("arg1", COGENCY), Some(Score::Medium));
    assert_eq!(tables[0].score("arg2", COGENCY), Some(Score::High));
    // Other branches of Overall Quality are empty, so it inherits Cogency.
    assert_eq!(tables[0].score("arg1", OVERALL_QUALITY), Some(Score::Medium));
}

#[test]
fn majority_population_collapses_replicates() {
    let config = AnnotatorConfig::new("GPT3", PromptVariant::Novice).majority();
    let mut source = MemoryRatingSource::new();
    source.insert(
        &config,
        vec![
            vec![record("arg1", CLARITY, 3), record("arg2", CLARITY, 1)],
            vec![record("arg1", CLARITY, 3), record("arg2", CLARITY, 3)],
            vec![record("arg1", CLARITY, 2), record("arg2", CLARITY, 2)],
        ],
    );

    let rows = engine().population(&source, &config).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].score("arg1", CLARITY), Some(Score::High));
    // Three-way tie resolves to the lowest score.
    assert_eq!(rows[0].score("arg2", CLARITY), Some(Score::Low));
}

#[test]
fn disjoint_annotators_leave_alpha_undefined() {
    let a = AnnotatorConfig::new("human", PromptVariant::Novice);
    let b = AnnotatorConfig::new("GPT3", PromptVariant::Novice);
    let mut source = MemoryRatingSource::new();
    source.insert(&a, vec![vec![record("arg1", CLARITY, 1)]]);
    source.insert(&b, vec![vec![record("arg2", CLARITY, 3)]]);

    let report = engine().alphas(&source, &[a, b]).unwrap();
    assert!(report.per_dimension.values().all(Option::is_none));
    assert_eq!(report.across_dimensions, None);
    let json = serde_json::to_value(report.alpha_map()).unwrap();
    assert!(json["Across Dimensions"].is_null());
}

#[test]
fn directory_source_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let ratings: Vec<RatingRecord> = ["arg1", "arg2", "arg3"]
        .iter()
        .zip([1u8, 2, 3])
        .map(|(id, r)| record(id, CLARITY, r))
        .collect();
    write_replicate(dir.path(), "human-novice-1.jsonl", &ratings);
    write_replicate(dir.path(), "human-novice-2.jsonl", &ratings);
    let mut shifted = ratings.clone();
    shifted[0] = record("arg1", CLARITY, 3);
    write_replicate(dir.path(), "GPT3-novice-reasoning-1.jsonl", &shifted);
    // A stray file that must not be mistaken for a replicate.
    fs::write(dir.path().join("human-novice-notes.jsonl"), "not json\n").unwrap();

    let source = DirectoryRatingSource::new(dir.path());
    let humans = AnnotatorConfig::new("human", PromptVariant::Novice);
    let model = AnnotatorConfig::new("GPT3", PromptVariant::Novice).reasoning(true);

    let engine = engine();
    let human_only = engine.alphas(&source, &[humans.clone()]).unwrap();
    // Replicate identity lives in the annotator name, in file order.
    assert_eq!(human_only.annotators, vec!["human_1_novice", "human_2_novice"]);
    assert_eq!(human_only.alpha(CLARITY), Some(1.0));

    let mixed = engine.alphas(&source, &[humans.clone(), model]).unwrap();
    assert_eq!(mixed.annotators.len(), 3);
    let alpha = mixed.alpha(CLARITY).unwrap();
    assert!(alpha < 1.0 && alpha > 0.0, "alpha = {alpha}");

    let human_tables = engine.replicate_tables(&source, &humans).unwrap();
    let perfect = perfect_subset(&human_tables, CLARITY);
    assert_eq!(perfect.len(), 3);
}

#[test]
fn pooled_alpha_stacks_dimension_item_units() {
    let a = vec![
        record("arg1", CLARITY, 1),
        record("arg2", CLARITY, 2),
        record("arg1", ARRANGEMENT, 3),
    ];
    let b = vec![
        record("arg1", CLARITY, 1),
        record("arg2", CLARITY, 2),
        record("arg1", ARRANGEMENT, 2),
    ];
    let config = AnnotatorConfig::new("human", PromptVariant::Expert);
    let mut source = MemoryRatingSource::new();
    source.insert(&config, vec![a, b]);

    let engine = engine();
    let tables = engine.replicate_tables(&source, &config).unwrap();

    // Base dimensions only: units Clarity::arg1 (1,1), Clarity::arg2 (2,2),
    // Arrangement::arg1 (3,2); n = (2, 3, 1), Do = 4/3, De = 6, alpha = 7/9.
    let pooled = ReliabilityMatrix::pooled(&tables, [CLARITY, ARRANGEMENT], engine.exclusions());
    assert_eq!(pooled.pairable_units(), 3);
    let alpha = ordinal_alpha(&pooled).unwrap();
    assert!((alpha - 7.0 / 9.0).abs() < 1e-12, "alpha = {alpha}");

    // The report adds Effectiveness and Overall Quality, both (2,2) on arg1
    // and arg2: n = (2, 11, 1), Do = 72/14, De = 18, alpha = 5/7.
    let report = engine.report(&tables);
    assert_eq!(report.alpha(CLARITY), Some(1.0));
    assert!(report.alpha(ARRANGEMENT).unwrap().abs() < 1e-12);
    let across = report.across_dimensions.unwrap();
    assert!((across - 5.0 / 7.0).abs() < 1e-12, "across = {across}");
}
