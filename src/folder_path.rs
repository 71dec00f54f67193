//! Normalized folder-path value type (spec §3.1.1, §4.1).

use std::fmt;

/// An ordered, normalized sequence of folder name components.
///
/// `from_raw` is total: every string, however malformed, maps to some
/// `FolderPath`. `""`, `"/"`, and `"//"` all normalize to the same empty
/// sequence, which is the root path and is a parent of every other path
/// (including itself) — this is the mechanism by which a root-folder scope
/// includes resources with no folder assignment (spec §4.1 Policy).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FolderPath {
    components: Vec<String>,
}

impl FolderPath {
    /// Build a `FolderPath` from a raw string, discarding empty components
    /// caused by leading/trailing/doubled slashes.
    pub fn from_raw(s: &str) -> Self {
        let components = s
            .split('/')
            .filter(|c| !c.is_empty())
            .map(str::to_owned)
            .collect();
        Self { components }
    }

    /// True iff `self` is a proper-or-equal, case-sensitive, per-component
    /// prefix of `other`. Never matches across partial components:
    /// `FolderPath::from_raw("Chem")` is not a parent of
    /// `FolderPath::from_raw("Chemistry")` (spec P4).
    pub fn is_parent_of(&self, other: &FolderPath) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }

    /// Component-wise equality.
    pub fn equals(&self, other: &FolderPath) -> bool {
        self.components == other.components
    }

    /// True for the root/unspecified-folder path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Slash-joined display form, used for metadata (spec §4.7).
    pub fn display_path(&self) -> String {
        self.components.join("/")
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.display_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_variants_normalize_equal() {
        assert_eq!(FolderPath::from_raw(""), FolderPath::from_raw("/"));
        assert_eq!(FolderPath::from_raw("/"), FolderPath::from_raw("//"));
    }

    #[test]
    fn root_is_parent_of_everything() {
        let root = FolderPath::from_raw("");
        assert!(root.is_parent_of(&root));
        assert!(root.is_parent_of(&FolderPath::from_raw("Chem/Organic")));
    }

    #[test]
    fn reflexive() {
        let a = FolderPath::from_raw("Chem/Organic");
        assert!(a.is_parent_of(&a));
    }

    #[test]
    fn transitive() {
        let a = FolderPath::from_raw("Chem");
        let b = FolderPath::from_raw("Chem/Organic");
        let c = FolderPath::from_raw("Chem/Organic/Synthesis");
        assert!(a.is_parent_of(&b));
        assert!(b.is_parent_of(&c));
        assert!(a.is_parent_of(&c));
    }

    #[test]
    fn prefix_is_component_wise_not_character_wise() {
        assert!(!FolderPath::from_raw("Chem").is_parent_of(&FolderPath::from_raw("Chemistry")));
        assert!(!FolderPath::from_raw("A/B").is_parent_of(&FolderPath::from_raw("A/BC")));
    }

    #[test]
    fn strips_redundant_slashes() {
        assert_eq!(
            FolderPath::from_raw("/A//B/"),
            FolderPath::from_raw("A/B")
        );
    }

    #[test]
    fn case_sensitive() {
        assert!(!FolderPath::from_raw("chem").is_parent_of(&FolderPath::from_raw("Chem/Organic")));
    }

    proptest::proptest! {
        #[test]
        fn prop_strip_slashes_idempotent(s in "[a-zA-Z0-9/]{0,40}") {
            let stripped: String = {
                let parts: Vec<&str> = s.split('/').filter(|c| !c.is_empty()).collect();
                parts.join("/")
            };
            proptest::prop_assert_eq!(FolderPath::from_raw(&s), FolderPath::from_raw(&stripped));
        }

        #[test]
        fn prop_reflexive(s in "[a-zA-Z0-9/]{0,40}") {
            let p = FolderPath::from_raw(&s);
            proptest::prop_assert!(p.is_parent_of(&p));
        }

        #[test]
        fn prop_transitive(a in "[a-zA-Z0-9]{0,10}", b in "[a-zA-Z0-9]{0,10}", c in "[a-zA-Z0-9]{0,10}") {
            let pa = FolderPath::from_raw(&a);
            let pab = FolderPath::from_raw(&format!("{a}/{b}"));
            let pabc = FolderPath::from_raw(&format!("{a}/{b}/{c}"));
            if pa.is_parent_of(&pab) && pab.is_parent_of(&pabc) {
                proptest::prop_assert!(pa.is_parent_of(&pabc));
            }
        }
    }
}
