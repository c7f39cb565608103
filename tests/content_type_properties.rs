// tests/content_type_properties.rs

use std::collections::BTreeMap;

use proptest::prelude::*;

use aardy::content_type::ContentType;

fn params() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-d]", "[x-z,;\"\\\\]{1,3}", 0..4)
}

fn with_params(kind: &str, subtype: &str, params: &BTreeMap<String, String>) -> ContentType {
    params
        .iter()
        .fold(ContentType::new(kind, subtype), |ct, (k, v)| ct.with_param(k, v))
}

proptest! {
    /// `a` is an ancestor of `b` exactly when type/subtype match and every
    /// parameter of `a` appears in `b` with the same value.
    #[test]
    fn ancestry_is_subset_of_params(
        a_sub in "(bash|sh)",
        b_sub in "(bash|sh)",
        a_params in params(),
        b_params in params(),
    ) {
        let a = with_params("text", &a_sub, &a_params);
        let b = with_params("text", &b_sub, &b_params);

        let expected = a_sub == b_sub
            && a_params.iter().all(|(k, v)| b_params.get(k) == Some(v));
        prop_assert_eq!(a.is_ancestor_of(&b, None), expected);
    }

    #[test]
    fn every_type_is_its_own_ancestor(sub in "[a-z]{1,6}", p in params()) {
        let ct = with_params("text", &sub, &p);
        prop_assert!(ct.is_ancestor_of(&ct, None));
    }

    #[test]
    fn display_parses_back(sub in "[a-z]{1,6}", p in params()) {
        let ct = with_params("text", &sub, &p);
        let reparsed: ContentType = ct.to_string().parse().unwrap();
        prop_assert_eq!(reparsed, ct);
    }
}
