//! Full-text index: tokenized search over weighted string fields.
//!
//! Documents are the string properties of labeled nodes. Tokenization
//! lowercases, splits on non-alphanumerics, drops stopwords, and optionally
//! applies a light English stemmer and a phonetic (soundex) variant per
//! field. Scores are summed field weights per matching token.

use hashbrown::{HashMap, HashSet};

use crate::model::Value;
use crate::store::entity::AttributeSet;
use crate::store::schema::AttrId;

/// Per-field options, mirroring what the schema snapshot carries.
#[derive(Debug, Clone, PartialEq)]
pub struct FtField {
    pub attr: AttrId,
    pub weight: f64,
    pub nostem: bool,
    pub phonetic: bool,
}

impl FtField {
    pub fn plain(attr: AttrId) -> Self {
        Self { attr, weight: 1.0, nostem: false, phonetic: false }
    }
}

const DEFAULT_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if",
    "in", "into", "is", "it", "no", "not", "of", "on", "or", "such", "that",
    "the", "their", "then", "there", "these", "they", "this", "to", "was",
    "will", "with",
];

#[derive(Debug)]
pub struct FullTextIndex {
    fields: Vec<FtField>,
    language: String,
    stopwords: HashSet<String>,
    /// token → (entity id → accumulated score)
    postings: HashMap<String, HashMap<u64, f64>>,
}

impl FullTextIndex {
    pub fn new(fields: Vec<FtField>, language: impl Into<String>, stopwords: Option<Vec<String>>) -> Self {
        let stopwords = match stopwords {
            Some(words) => words.into_iter().map(|w| w.to_lowercase()).collect(),
            None => DEFAULT_STOPWORDS.iter().map(|w| (*w).to_owned()).collect(),
        };
        Self {
            fields,
            language: language.into(),
            stopwords,
            postings: HashMap::new(),
        }
    }

    pub fn fields(&self) -> &[FtField] {
        &self.fields
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn stopwords(&self) -> Vec<String> {
        let mut words: Vec<String> = self.stopwords.iter().cloned().collect();
        words.sort();
        words
    }

    pub fn clear(&mut self) {
        self.postings.clear();
    }

    fn field_tokens(&self, field: &FtField, attrs: &AttributeSet) -> Vec<String> {
        let Some(Value::String(text)) = attrs.get(field.attr) else {
            return Vec::new();
        };
        let mut tokens = Vec::new();
        for raw in text.split(|c: char| !c.is_alphanumeric()) {
            if raw.is_empty() {
                continue;
            }
            let token = raw.to_lowercase();
            if self.stopwords.contains(&token) {
                continue;
            }
            let token = if field.nostem { token } else { stem(&token) };
            if field.phonetic {
                tokens.push(format!("s:{}", soundex(&token)));
            }
            tokens.push(token);
        }
        tokens
    }

    pub fn index_entity(&mut self, id: u64, attrs: &AttributeSet) {
        let fields = self.fields.clone();
        for field in &fields {
            for token in self.field_tokens(field, attrs) {
                let doc = self.postings.entry(token).or_default();
                *doc.entry(id).or_insert(0.0) += field.weight;
            }
        }
    }

    pub fn unindex_entity(&mut self, id: u64, attrs: &AttributeSet) {
        let fields = self.fields.clone();
        for field in &fields {
            for token in self.field_tokens(field, attrs) {
                if let Some(doc) = self.postings.get_mut(&token) {
                    doc.remove(&id);
                    if doc.is_empty() {
                        self.postings.remove(&token);
                    }
                }
            }
        }
    }

    /// Tokenized query: entities matching any token, highest score first,
    /// id ascending as a tie-break so results are deterministic.
    pub fn query(&self, text: &str) -> Vec<(u64, f64)> {
        let mut scores: HashMap<u64, f64> = HashMap::new();
        for raw in text.split(|c: char| !c.is_alphanumeric()) {
            if raw.is_empty() {
                continue;
            }
            let token = raw.to_lowercase();
            if self.stopwords.contains(&token) {
                continue;
            }
            for candidate in [stem(&token), token] {
                if let Some(doc) = self.postings.get(&candidate) {
                    for (id, w) in doc {
                        *scores.entry(*id).or_insert(0.0) += w;
                    }
                    break;
                }
            }
        }
        let mut out: Vec<(u64, f64)> = scores.into_iter().collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        out
    }
}

/// Light English suffix stripper. Enough to fold common inflections
/// without a dictionary.
fn stem(token: &str) -> String {
    for suffix in ["ing", "edly", "ed", "es", "s"] {
        if let Some(base) = token.strip_suffix(suffix) {
            if base.len() < 3 {
                continue;
            }
            // collapse the doubled consonant left by -ing/-ed ("running" → "run")
            let bytes = base.as_bytes();
            let n = bytes.len();
            if n >= 2 && bytes[n - 1] == bytes[n - 2] && !matches!(bytes[n - 1], b'a' | b'e' | b'i' | b'o' | b'u') {
                return base[..n - 1].to_owned();
            }
            return base.to_owned();
        }
    }
    token.to_owned()
}

/// Classic four-character soundex code.
fn soundex(token: &str) -> String {
    fn digit(c: char) -> Option<char> {
        match c {
            'b' | 'f' | 'p' | 'v' => Some('1'),
            'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
            'd' | 't' => Some('3'),
            'l' => Some('4'),
            'm' | 'n' => Some('5'),
            'r' => Some('6'),
            _ => None,
        }
    }

    let mut chars = token.chars().filter(|c| c.is_ascii_alphabetic());
    let Some(first) = chars.next() else { return "0000".into() };
    let mut code = String::new();
    code.push(first.to_ascii_uppercase());
    let mut last = digit(first.to_ascii_lowercase());
    for c in chars {
        let d = digit(c.to_ascii_lowercase());
        if let Some(d) = d {
            if Some(d) != last {
                code.push(d);
                if code.len() == 4 {
                    break;
                }
            }
        }
        last = d;
    }
    while code.len() < 4 {
        code.push('0');
    }
    code
}
