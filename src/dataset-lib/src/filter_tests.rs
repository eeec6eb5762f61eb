#[cfg(test)]
mod tests {
    use crate::filter::{Clause, Filter, FilterOp, FilterValue};
    use crate::metadata::{MetaKey, MetaValue, Metadata};
    use crate::ErrorKind;

    fn dataset(name: &str, access: &str, date: &str, script: &str) -> (String, Metadata) {
        let mut md = Metadata::new();
        md.set(
            &MetaKey::parse("dataset.name").unwrap(),
            MetaValue::Str(name.to_string()),
        );
        md.set(
            &MetaKey::parse("dataset.access").unwrap(),
            MetaValue::Str(access.to_string()),
        );
        md.set(
            &MetaKey::parse("dataset.metalog.pbench.date").unwrap(),
            MetaValue::Str(date.to_string()),
        );
        md.set(
            &MetaKey::parse("dataset.metalog.pbench.script").unwrap(),
            MetaValue::Str(script.to_string()),
        );
        (name.to_string(), md)
    }

    fn fixtures() -> Vec<(String, Metadata)> {
        vec![
            dataset("a-2017", "public", "2017-03-01T10:00:00", "fio"),
            dataset("b-2018", "public", "2018-10-25T10:36:03", "uperf"),
            dataset("c-2018", "private", "2018-11-02T08:00:00", "fio"),
            dataset("d-2019", "public", "2019-01-19T00:18:06", "linpack"),
            dataset("e-2019", "private", "2019-07-04T12:00:00", "uperf"),
            dataset("f-2020", "public", "2020-01-19T00:18:06", "fio"),
        ]
    }

    fn select(filter: &Filter) -> Vec<String> {
        fixtures()
            .into_iter()
            .filter(|(_, md)| filter.matches(md))
            .map(|(name, _)| name)
            .collect()
    }

    #[test]
    fn test_access_public() {
        let filter = Filter::compile(&["dataset.access:public"]).unwrap();
        assert_eq!(select(&filter), vec!["a-2017", "b-2018", "d-2019", "f-2020"]);
    }

    #[test]
    fn test_and_or_group() {
        let filter = Filter::compile(&[
            "dataset.access:public",
            "^dataset.metalog.pbench.date:~2018",
            "^dataset.metalog.pbench.date:~2019",
        ])
        .unwrap();
        assert_eq!(filter.or_groups(), 1);
        assert_eq!(select(&filter), vec!["b-2018", "d-2019"]);
    }

    #[test]
    fn test_or_only() {
        let filter = Filter::compile(&[
            "^dataset.metalog.pbench.script:fio",
            "^dataset.metalog.pbench.script:linpack",
        ])
        .unwrap();
        assert_eq!(select(&filter), vec!["a-2017", "c-2018", "d-2019", "f-2020"]);
    }

    #[test]
    fn test_plain_and() {
        let filter = Filter::compile(&[
            "dataset.metalog.pbench.date:~2018",
            "dataset.access:public",
        ])
        .unwrap();
        assert_eq!(select(&filter), vec!["b-2018"]);
    }

    #[test]
    fn test_separated_or_groups() {
        // Two runs of `^` clauses are two independent OR groups.
        let filter = Filter::compile(&[
            "^dataset.metalog.pbench.script:fio",
            "^dataset.metalog.pbench.script:uperf",
            "dataset.metalog.pbench.date:>2018",
            "^dataset.access:private",
            "^dataset.metalog.pbench.date:~2020",
        ])
        .unwrap();
        assert_eq!(filter.or_groups(), 2);
        assert_eq!(select(&filter), vec!["c-2018", "e-2019", "f-2020"]);
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = Filter::compile::<&str>(&[]).unwrap();
        assert!(filter.is_empty());
        assert_eq!(select(&filter).len(), fixtures().len());
    }

    #[test]
    fn test_metadata_keys_are_case_sensitive() {
        let filter = Filter::compile(&["dataset.access:PUBLIC"]).unwrap();
        assert!(select(&filter).is_empty());

        let friendly = Filter::new().and(Clause::friendly(
            MetaKey::parse("dataset.access").unwrap(),
            FilterOp::Eq,
            FilterValue::Str("PUBLIC".to_string()),
        ));
        assert_eq!(select(&friendly).len(), 4);
    }

    #[test]
    fn test_missing_key_is_no_match() {
        let filter = Filter::compile(&["server.origin:test"]).unwrap();
        assert!(select(&filter).is_empty());

        let filter = Filter::compile(&["server.origin:!=test"]).unwrap();
        assert_eq!(select(&filter).len(), fixtures().len());
    }

    #[test]
    fn test_typed_date() {
        let mut early = Metadata::new();
        early.set(
            &MetaKey::parse("server.deletion").unwrap(),
            MetaValue::Str("2023-01-10T00:00:00Z".to_string()),
        );
        let mut late = Metadata::new();
        late.set(
            &MetaKey::parse("server.deletion").unwrap(),
            MetaValue::Str("2024-06-01".to_string()),
        );

        let filter = Filter::compile(&["server.deletion:<'02/01/2023 00:00+0000':date"]).unwrap();
        assert!(filter.matches(&early));
        assert!(!filter.matches(&late));

        let filter = Filter::compile(&["server.deletion:>=2024-06-01:date"]).unwrap();
        assert!(!filter.matches(&early));
        assert!(filter.matches(&late));
    }

    #[test]
    fn test_typed_bool() {
        let mut md = Metadata::new();
        md.set(
            &MetaKey::parse("server.archiveonly").unwrap(),
            MetaValue::Bool(false),
        );
        assert!(Filter::compile(&["server.archiveonly:false:bool"])
            .unwrap()
            .matches(&md));
        assert!(Filter::compile(&["server.archiveonly:N:bool"])
            .unwrap()
            .matches(&md));
        assert!(!Filter::compile(&["server.archiveonly:y:bool"])
            .unwrap()
            .matches(&md));
        // Untyped comparison sees the text form.
        assert!(Filter::compile(&["server.archiveonly:false"])
            .unwrap()
            .matches(&md));
    }

    #[test]
    fn test_typed_int() {
        let mut md = Metadata::new();
        md.set(
            &MetaKey::parse("global.runs").unwrap(),
            MetaValue::Int(12),
        );
        assert!(Filter::compile(&["global.runs:>9:int"]).unwrap().matches(&md));
        assert!(!Filter::compile(&["global.runs:<=9:int"]).unwrap().matches(&md));
    }

    #[test]
    fn test_bad_clause_rejects_whole_filter() {
        let bad = [
            vec!["dataset.access:public", "server.archiveonly:maybe:bool"],
            vec!["server.deletion:<yesterday:date"],
            vec!["global.runs:many:int"],
            vec!["dataset.access:public:colour"],
            vec!["no-colon"],
            vec![":public"],
            vec!["bogus.key:x"],
            vec!["server.archiveonly:~true:bool"],
            vec!["server.archiveonly:<true:bool"],
            vec!["server.deletion:'2023-01-01:date"],
            vec!["server.deletion:2023:01:01"],
        ];
        for clauses in bad {
            let err = Filter::compile(&clauses).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{:?}", clauses);
        }
    }

    #[test]
    fn test_quoted_value_with_colon() {
        let clause = Clause::parse("global.note:'a:b'").unwrap();
        assert_eq!(clause.op, FilterOp::Eq);
        assert_eq!(clause.value, FilterValue::Str("a:b".to_string()));
    }
}
