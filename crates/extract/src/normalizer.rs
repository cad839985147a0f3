use regex::Regex;

/// Common corporate suffixes stripped during name normalization so
/// "Acme Corp" and "Acme Corporation" block and score together.
const CORPORATE_SUFFIXES: &[&str] = &[
    "incorporated",
    "corporation",
    "company",
    "limited",
    "inc",
    "corp",
    "ltd",
    "llc",
    "plc",
    "gmbh",
    "co",
];

/// Normalizes entity surface names into comparison keys: case-folded,
/// punctuation-stripped, whitespace-collapsed, corporate suffixes
/// removed. Pure and deterministic so resolution stays order-independent.
pub struct NameNormalizer {
    punctuation: Regex,
    whitespace: Regex,
}

impl NameNormalizer {
    pub fn new() -> Self {
        Self {
            punctuation: Regex::new(r"[.,!?;:'\x22()\[\]]").expect("valid pattern"),
            whitespace: Regex::new(r"\s+").expect("valid pattern"),
        }
    }

    /// Normalize a surface name into its comparison form.
    pub fn normalize(&self, name: &str) -> String {
        let mut normalized = name.to_lowercase();
        normalized = self.punctuation.replace_all(&normalized, "").to_string();
        normalized = self
            .whitespace
            .replace_all(normalized.trim(), " ")
            .to_string();

        // Strip trailing corporate suffixes, repeatedly: "acme corp inc"
        // reduces to "acme". Never strip down to an empty name.
        loop {
            let mut stripped = false;
            for suffix in CORPORATE_SUFFIXES {
                if let Some(rest) = normalized.strip_suffix(suffix) {
                    // Only strip whole trailing words, never word tails.
                    if rest.ends_with(' ') {
                        normalized = rest.trim_end().to_string();
                        stripped = true;
                        break;
                    }
                }
            }
            if !stripped {
                break;
            }
        }

        normalized
    }

    /// Blocking key: the first token of the normalized name. Candidates
    /// are only compared within the same (type group, key) block.
    pub fn block_key(&self, name: &str) -> String {
        self.normalize(name)
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

impl Default for NameNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
