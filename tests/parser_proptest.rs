//! Property-based tests for verdict parsing, batch partitioning and
//! per-pass accounting.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use proptest::prelude::*;

use agd_eval::{
    BatchId, DispatchConfig, Dispatcher, Domain, DomainKey, Label, SimulatedModel,
    SimulationConfig, Verdict, VerdictLog, parse_response, partition,
};

mod strategies {
    use super::*;

    /// A lowercase domain with one to three labels and a TLD.
    pub fn domain_name() -> impl Strategy<Value = String> {
        (
            prop::collection::vec("[a-z0-9][a-z0-9-]{0,14}[a-z0-9]", 1..=3),
            "[a-z]{2,6}",
        )
            .prop_map(|(labels, tld)| format!("{}.{tld}", labels.join(".")))
    }

    pub fn label() -> impl Strategy<Value = Label> {
        prop_oneof![Just(Label::Legitimate), Just(Label::Malicious)]
    }

    pub fn verdict() -> impl Strategy<Value = Verdict> {
        (domain_name(), label(), 0.0f64..=100.0)
            .prop_map(|(d, l, c)| Verdict::new(d, l, c).unwrap())
    }

    /// Distinct domains, alternating labels.
    pub fn domains(max: usize) -> impl Strategy<Value = Vec<Domain>> {
        prop::collection::btree_set(domain_name(), 0..max).prop_map(|names| {
            names
                .into_iter()
                .enumerate()
                .map(|(i, name)| {
                    if i % 2 == 0 {
                        Domain::legitimate(name)
                    } else {
                        Domain::malicious(name, "fam")
                    }
                })
                .collect()
        })
    }
}

proptest! {
    #[test]
    fn verdict_round_trips_through_text(v in strategies::verdict()) {
        let parsed = Verdict::parse_line(&v.to_string()).unwrap();
        prop_assert_eq!(parsed, v);
    }

    #[test]
    fn verdict_round_trips_with_padding(v in strategies::verdict(), pad in "[ \t]{0,3}") {
        let line = format!("{pad}{v}{pad}");
        prop_assert_eq!(Verdict::parse_line(&line).unwrap(), v);
    }

    #[test]
    fn response_lines_are_either_verdicts_or_failures(
        verdicts in prop::collection::vec(strategies::verdict(), 0..20),
        junk in prop::collection::vec("[A-Za-z ,:]{1,30}", 0..5),
    ) {
        let mut text = String::new();
        for line in &junk {
            text.push_str(line);
            text.push('\n');
        }
        for v in &verdicts {
            text.push_str(&v.to_string());
            text.push('\n');
        }

        let parsed = parse_response(&text, BatchId::new(0, 0));
        let non_blank = junk.iter().filter(|j| !j.trim().is_empty()).count();
        prop_assert_eq!(parsed.verdicts, verdicts);
        prop_assert_eq!(parsed.failures.len(), non_blank);
    }

    #[test]
    fn confidence_above_range_is_rejected(d in strategies::domain_name(), c in 100.001f64..1e6) {
        let line = format!("{d}|Y|{c}");
        prop_assert!(Verdict::parse_line(&line).is_err());
    }

    #[test]
    fn partition_covers_input_disjointly(
        domains in strategies::domains(300),
        batch_size in 1usize..60,
    ) {
        let batches = partition(&domains, batch_size);

        prop_assert_eq!(batches.len(), domains.len().div_ceil(batch_size));
        prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= batch_size));

        let flattened: Vec<&Domain> = batches.iter().flat_map(|b| b.iter()).collect();
        prop_assert_eq!(flattened.len(), domains.len());
        prop_assert!(flattened.iter().zip(&domains).all(|(a, b)| *a == b));

        let mut seen = BTreeSet::new();
        for domain in flattened {
            prop_assert!(seen.insert(domain.key()));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn pass_accounting_partitions_dispatched_domains(
        domains in strategies::domains(40),
        omit in prop::collection::vec(any::<bool>(), 40),
        garble in prop::collection::vec(any::<bool>(), 40),
        batch_size in 1usize..10,
    ) {
        let mut config = SimulationConfig::new();
        for (i, domain) in domains.iter().enumerate() {
            if omit[i] {
                config = config.with_omitted(domain.name());
            } else if garble[i] {
                config = config.with_garbled(domain.name());
            }
        }
        let model = SimulatedModel::new("prop", &domains, config);
        let dir = tempfile::tempdir().unwrap();
        let mut log = VerdictLog::open(dir.path(), "prop", 1).unwrap();
        let index: HashMap<DomainKey, &Domain> = domains.iter().map(|d| (d.key(), d)).collect();

        let report = Dispatcher::new(
            &model,
            "p",
            batch_size,
            DispatchConfig::new().with_transient_backoff(Duration::ZERO),
        )
        .dispatch(&domains, &index, &mut log)
        .unwrap();

        let acc = &report.accounting;
        let all: BTreeSet<DomainKey> = domains.iter().map(Domain::key).collect();
        let union: BTreeSet<DomainKey> = acc
            .verdicted
            .iter()
            .chain(&acc.parse_failed)
            .chain(&acc.absent)
            .cloned()
            .collect();

        prop_assert_eq!(
            acc.verdicted.len() + acc.parse_failed.len() + acc.absent.len(),
            all.len()
        );
        prop_assert_eq!(union, all);
        let omitted = omit.iter().take(domains.len()).filter(|o| **o).count();
        prop_assert_eq!(acc.absent.len(), omitted);
    }
}
