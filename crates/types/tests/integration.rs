//! Integration tests for types

#[cfg(test)]
mod tests {
    use nmx_types::*;
    use proptest::prelude::*;

    #[test]
    fn test_hoist_kind_display() {
        assert_eq!(HoistKind::Public.to_string(), "public");
        assert_eq!(HoistKind::Private.to_string(), "private");
    }

    #[test]
    fn test_package_snapshot_children_marks_optional() {
        let mut snapshot = PackageSnapshot::default();
        snapshot.dependencies.insert("b".into(), "1.0.0".into());
        snapshot
            .optional_dependencies
            .insert("fsevents".into(), "2.3.3".into());

        let children: Vec<_> = snapshot.children().collect();
        assert_eq!(
            children,
            vec![("b", "1.0.0", false), ("fsevents", "2.3.3", true)]
        );
    }

    #[test]
    fn test_same_children_ignores_other_fields() {
        let mut left = PackageSnapshot::default();
        left.dependencies.insert("b".into(), "1.0.0".into());
        let mut right = left.clone();
        right.requires_build = true;
        assert!(left.same_children(&right));

        right.optional_dependencies.insert("c".into(), "1.0.0".into());
        assert!(!left.same_children(&right));
    }

    #[test]
    fn test_name_and_version_prefers_snapshot_fields() {
        let dep_path = DepPath::new("local@file:../local");
        let snapshot = PackageSnapshot {
            name: Some("local".into()),
            version: Some("0.3.0".into()),
            ..PackageSnapshot::default()
        };
        assert_eq!(
            snapshot.name_and_version(&dep_path),
            Some(("local".to_string(), "0.3.0".to_string()))
        );
    }

    proptest! {
        #[test]
        fn prop_plain_reference_is_qualified_by_alias(
            name in "[a-z][a-z0-9-]{0,12}",
            major in 0u32..50,
            minor in 0u32..50,
        ) {
            let reference = format!("{major}.{minor}.0");
            let dep_path = DepPath::from_reference(&name, &reference).unwrap();
            prop_assert_eq!(dep_path.name(), Some(name.as_str()));
            prop_assert_eq!(dep_path.version(), Some(reference.as_str()));
        }

        #[test]
        fn prop_peer_suffix_never_changes_name(
            name in "@[a-z]{1,6}/[a-z]{1,8}",
            peer in "[a-z]{1,8}",
        ) {
            let dep_path = DepPath::new(format!("{name}@1.0.0({peer}@2.0.0)"));
            prop_assert_eq!(dep_path.name(), Some(name.as_str()));
            prop_assert_eq!(dep_path.version(), Some("1.0.0"));
        }
    }
}
