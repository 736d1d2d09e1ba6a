//! Product-description classifier for break content scoring.

use regex::Regex;

/// Content categories, in the order used for the rendered content string.
pub const CATEGORIES: &[&str] = &[
    "tRNA",
    "SM",
    "regulatory",
    "resistance",
    "transport",
    "mobile",
    "phage",
    "CRISPR",
];

/// Per-category match counts of one gene list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Counts {
    pub trna: i64,
    pub sm: i64,
    pub regulatory: i64,
    pub resistance: i64,
    pub transport: i64,
    pub mobile: i64,
    pub phage: i64,
    pub crispr: i64,
}

impl Counts {
    /// The counts in `CATEGORIES` order.
    fn ordered(&self) -> [(&'static str, i64); 8] {
        [
            ("tRNA", self.trna),
            ("SM", self.sm),
            ("regulatory", self.regulatory),
            ("resistance", self.resistance),
            ("transport", self.transport),
            ("mobile", self.mobile),
            ("phage", self.phage),
            ("CRISPR", self.crispr),
        ]
    }

    /// Render the non-zero categories as a stable comma-joined string.
    pub fn render(&self) -> String {
        self.ordered()
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(name, count)| format!("{}: {}", name, count))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Compiled case-insensitive, word-boundary product patterns.
#[derive(Debug)]
pub struct Classifier {
    mobile: Regex,
    phage: Regex,
    crispr: Regex,
    regulatory: Regex,
    transport: Regex,
    resistance: Regex,
    sm: Regex,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        let compile = |pattern: &str| {
            Regex::new(pattern).expect("classifier patterns are statically valid")
        };
        Self {
            mobile: compile(
                r"(?i)\b(insertion|mobile element|integrase|excisionase|plasmid|DNA ligase|transposase|transfer protein|Spd[ABCD])\b",
            ),
            phage: compile(r"(?i)\b(pro-?)?phage\b"),
            crispr: compile(r"(?i)\bCRISPR(-\w+)?\b"),
            regulatory: compile(r"(?i)\b(regulat|repress)(or|ory|ion)\b"),
            transport: compile(r"(?i)\b(transport(er|ing)?|export|permease|efflux)\b"),
            resistance: compile(r"(?i)\bresistance\b"),
            sm: compile(
                r"(?i)\b(PKS|polyketide|beta[- ]?lactamase|penicillin|antibiotic|acyl[- ]?carrier|.+[cd]in|.+phenazine|chitin(ase)?)\b",
            ),
        }
    }

    /// Add the matches of one product description to `counts`.
    pub fn classify(&self, product: &str, counts: &mut Counts) {
        counts.mobile += self.mobile.find_iter(product).count() as i64;
        counts.phage += self.phage.find_iter(product).count() as i64;
        counts.crispr += self.crispr.find_iter(product).count() as i64;
        counts.regulatory += self.regulatory.find_iter(product).count() as i64;
        counts.transport += self.transport.find_iter(product).count() as i64;
        counts.resistance += self.resistance.find_iter(product).count() as i64;
        counts.sm += self.sm.find_iter(product).count() as i64;
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    fn counts(product: &str) -> super::Counts {
        let classifier = super::Classifier::new();
        let mut counts = super::Counts::default();
        classifier.classify(product, &mut counts);
        counts
    }

    #[rstest::rstest]
    #[case("IS4 family insertion sequence", 1)]
    #[case("site-specific integrase", 1)]
    #[case("conjugal transfer protein TraB", 1)]
    #[case("SpdB protein", 1)]
    #[case("DNA polymerase III", 0)]
    fn mobile(#[case] product: &str, #[case] expected: i64) {
        assert_eq!(expected, counts(product).mobile);
    }

    #[rstest::rstest]
    #[case("prophage integrase", 1, 1)]
    #[case("pro-phage tail fiber", 1, 0)]
    #[case("phage portal protein", 1, 0)]
    #[case("macrophage-like protein", 0, 0)]
    fn phage(#[case] product: &str, #[case] phage_expected: i64, #[case] mobile: i64) {
        assert_eq!(phage_expected, counts(product).phage);
        assert_eq!(mobile, counts(product).mobile);
    }

    #[rstest::rstest]
    #[case("transcriptional regulator", 1)]
    #[case("transcription repressor", 1)]
    #[case("regulatory protein", 1)]
    #[case("regulation of transcription", 1)]
    #[case("regular protein", 0)]
    fn regulatory(#[case] product: &str, #[case] expected: i64) {
        assert_eq!(expected, counts(product).regulatory);
    }

    #[rstest::rstest]
    #[case("ABC transporter permease", 2)]
    #[case("multidrug efflux pump", 1)]
    #[case("sugar export protein", 1)]
    #[case("transporting ATPase", 1)]
    fn transport(#[case] product: &str, #[case] expected: i64) {
        assert_eq!(expected, counts(product).transport);
    }

    #[rstest::rstest]
    #[case("tetracycline resistance protein", 1, 0)]
    #[case("beta-lactamase", 0, 1)]
    #[case("polyketide synthase", 0, 1)]
    #[case("actinorhodin biosynthesis protein", 0, 1)]
    #[case("regulation of phenazine biosynthesis", 0, 1)]
    #[case("chitinase C", 0, 1)]
    #[case("hypothetical protein", 0, 0)]
    fn resistance_and_sm(#[case] product: &str, #[case] resistance: i64, #[case] sm: i64) {
        assert_eq!(resistance, counts(product).resistance);
        assert_eq!(sm, counts(product).sm);
    }

    #[test]
    fn crispr_with_suffix() {
        assert_eq!(1, counts("CRISPR-associated endonuclease Cas9").crispr);
        assert_eq!(1, counts("CRISPR array").crispr);
    }

    #[test]
    fn render_keeps_fixed_order() {
        let mut c = super::Counts::default();
        c.phage = 2;
        c.trna = 1;
        c.transport = 3;
        assert_eq!("tRNA: 1, transport: 3, phage: 2", c.render());
    }
}
