//! Lexical similarity between a query and candidate chunks.
//!
//! Space-separated languages are scored with TF-IDF cosine similarity over
//! the query's own n-grams. Short queries and languages written without
//! spaces fall back to a character sequence match ratio.

use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

const STOPWORDS_JSONL: &str = include_str!("../../data/stopwords.jsonl");

/// Characters of each text looked at when guessing its language.
const MAX_CHARS_FOR_DETECTION: usize = 500;

/// Assumed when neither the query nor any document reveals a language.
const DEFAULT_LANG: &str = "en";

/// Languages tokenized per character rather than per word.
pub const NON_SPACE_SEPARATED_LANGS: [&str; 5] = ["zh", "ja", "ko", "th", "vi"];

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w\w+\b").expect("word token regex is valid"));
static DETECT_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w']+").expect("detection word regex is valid"));

#[derive(Deserialize)]
struct StopwordLine {
    lang: String,
    stopwords: Vec<String>,
}

/// Stopwords per language, in file order.
static STOPWORDS: LazyLock<Vec<(String, HashSet<String>)>> = LazyLock::new(|| {
    let mut tables = Vec::new();
    for (line_no, line) in STOPWORDS_JSONL.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StopwordLine>(line) {
            Ok(item) => tables.push((item.lang, item.stopwords.into_iter().collect())),
            Err(e) => tracing::error!("Skipping stopword table line {}: {}", line_no + 1, e),
        }
    }
    tables
});

/// Stopword set for `lang`, if one is bundled.
pub fn stopwords(lang: &str) -> Option<&'static HashSet<String>> {
    STOPWORDS
        .iter()
        .find(|(l, _)| l == lang)
        .map(|(_, words)| words)
}

fn is_han(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF)
}

fn is_kana(c: char) -> bool {
    matches!(c as u32, 0x3040..=0x30FF | 0x31F0..=0x31FF)
}

fn is_hangul(c: char) -> bool {
    matches!(c as u32, 0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F)
}

fn is_thai(c: char) -> bool {
    matches!(c as u32, 0x0E00..=0x0E7F)
}

/// Letters only Vietnamese uses among Latin-script languages.
fn is_vietnamese_letter(c: char) -> bool {
    "ăắằẳẵặơớờởỡợưứừửữựđạảấầẩẫậẹẻẽếềểễệỉịọỏốồổỗộụủỳỵỷỹ"
        .contains(c.to_lowercase().next().unwrap_or(c))
}

/// Best guess at the language of `text`, as a two-letter code.
///
/// Scripts without word spacing are recognised by their Unicode blocks.
/// Otherwise the language whose stopwords occur most often wins, ties going
/// to the earlier table. `None` when nothing identifies the language.
pub fn detect_language(text: &str) -> Option<String> {
    let sample: String = text.chars().take(MAX_CHARS_FOR_DETECTION).collect();

    let (mut han, mut kana, mut hangul, mut thai, mut viet, mut letters) = (0, 0, 0, 0, 0, 0);
    for c in sample.chars() {
        if !c.is_alphabetic() {
            continue;
        }
        letters += 1;
        if is_han(c) {
            han += 1;
        } else if is_kana(c) {
            kana += 1;
        } else if is_hangul(c) {
            hangul += 1;
        } else if is_thai(c) {
            thai += 1;
        } else if is_vietnamese_letter(c) {
            viet += 1;
        }
    }
    if letters == 0 {
        return None;
    }

    let cjk = han + kana + hangul + thai;
    if cjk * 2 >= letters {
        let lang = if hangul >= han + kana && hangul >= thai {
            "ko"
        } else if thai >= han + kana {
            "th"
        } else if kana > 0 {
            "ja"
        } else {
            "zh"
        };
        return Some(lang.to_string());
    }
    if viet > 0 && viet * 20 >= letters {
        return Some("vi".to_string());
    }

    let lowered = sample.to_lowercase();
    let words: Vec<&str> = DETECT_WORD_RE.find_iter(&lowered).map(|m| m.as_str()).collect();
    let mut best: Option<(&str, usize)> = None;
    for (lang, table) in STOPWORDS.iter() {
        if NON_SPACE_SEPARATED_LANGS.contains(&lang.as_str()) {
            continue;
        }
        let hits = words.iter().filter(|w| table.contains(**w)).count();
        if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
            best = Some((lang.as_str(), hits));
        }
    }
    best.map(|(lang, _)| lang.to_string())
}

/// Remove stopwords of `lang`. Non-space-separated languages are filtered
/// per character.
pub fn clean_stopwords(text: &str, lang: &str) -> String {
    let Some(table) = stopwords(lang) else {
        return text.to_string();
    };
    if NON_SPACE_SEPARATED_LANGS.contains(&lang) {
        text.chars()
            .filter(|c| !table.contains(c.to_string().as_str()))
            .collect()
    } else {
        text.split_whitespace()
            .filter(|w| !table.contains(*w))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Lowercased word n-grams (1..=ngram) with stopwords removed first.
fn analyze(text: &str, stop: &HashSet<String>, ngram: usize) -> Vec<String> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = WORD_RE
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|t| !stop.contains(*t))
        .collect();

    let mut grams = Vec::new();
    for n in 1..=ngram.max(1) {
        if tokens.len() < n {
            break;
        }
        for window in tokens.windows(n) {
            grams.push(window.join(" "));
        }
    }
    grams
}

/// TF-IDF cosine similarity of every document to the query, restricted to
/// the query's vocabulary. Smooth idf over documents plus the query, L2
/// normalized rows. `None` when the query has no usable terms.
fn tfidf_cosine(query: &str, documents: &[&str], stop: &HashSet<String>, ngram: usize) -> Option<Vec<f64>> {
    let query_terms = analyze(query, stop, ngram);
    let mut vocabulary: Vec<String> = Vec::new();
    for term in &query_terms {
        if !vocabulary.contains(term) {
            vocabulary.push(term.clone());
        }
    }
    if vocabulary.is_empty() {
        return None;
    }
    let index: HashMap<&str, usize> = vocabulary
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();

    let term_counts = |terms: &[String]| -> Vec<f64> {
        let mut counts = vec![0.0; vocabulary.len()];
        for term in terms {
            if let Some(&i) = index.get(term.as_str()) {
                counts[i] += 1.0;
            }
        }
        counts
    };

    let mut rows: Vec<Vec<f64>> = documents
        .iter()
        .map(|doc| term_counts(&analyze(doc, stop, ngram)))
        .collect();
    rows.push(term_counts(&query_terms));

    let n_docs = rows.len() as f64;
    let idf: Vec<f64> = (0..vocabulary.len())
        .map(|i| {
            let df = rows.iter().filter(|row| row[i] > 0.0).count() as f64;
            ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0
        })
        .collect();

    for row in rows.iter_mut() {
        for (value, weight) in row.iter_mut().zip(&idf) {
            *value *= weight;
        }
        let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            row.iter_mut().for_each(|v| *v /= norm);
        }
    }

    let query_row = rows.pop()?;
    Some(
        rows.iter()
            .map(|row| row.iter().zip(&query_row).map(|(a, b)| a * b).sum())
            .collect(),
    )
}

/// Similarity of each document in `documents` to `query`, in `[0, 1]`.
///
/// Texts whose language cannot be detected are scored in the language of
/// the others, or English when nothing is detected at all. When a document
/// is written in a different language than the query, every document scores
/// 1.0 so the caller's ranking is left alone.
pub fn tfidf_sim_scores(query: &str, documents: &[&str], min_reply_words: usize, ngram: usize) -> Vec<f64> {
    if documents.is_empty() {
        return Vec::new();
    }
    if query.is_empty() {
        return vec![0.0; documents.len()];
    }

    // Terse texts carry no stopwords; they take the language of the rest.
    let doc_langs: HashSet<String> = documents.iter().filter_map(|d| detect_language(d)).collect();
    let query_lang = detect_language(query)
        .or_else(|| doc_langs.iter().min().cloned())
        .unwrap_or_else(|| DEFAULT_LANG.to_string());
    if doc_langs.iter().any(|lang| *lang != query_lang) {
        tracing::debug!(lang = %query_lang, "Query and documents differ in language, skipping similarity");
        return vec![1.0; documents.len()];
    }

    let space_separated = !NON_SPACE_SEPARATED_LANGS.contains(&query_lang.as_str());
    if query.matches(' ').count() > min_reply_words && space_separated {
        let empty = HashSet::new();
        let stop = stopwords(&query_lang)
            .or_else(|| stopwords("en"))
            .unwrap_or(&empty);
        return tfidf_cosine(query, documents, stop, ngram).unwrap_or_else(|| vec![1.0; documents.len()]);
    }

    let query = clean_stopwords(query, &query_lang);
    documents
        .iter()
        .map(|doc| sequence_match_ratio(&query, &clean_stopwords(doc, &query_lang)))
        .collect()
}

/// Total length of the matching blocks between `a` and `b`, relative to the
/// shorter of the two. 1.0 when either is empty.
pub fn sequence_match_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 1.0;
    }
    let matched: usize = SequenceMatcher::new(&a, &b)
        .matching_blocks()
        .iter()
        .map(|&(_, _, size)| size)
        .sum();
    matched as f64 / a.len().min(b.len()) as f64
}

/// Longest-common-block matcher with the automatic popularity heuristic:
/// in sequences of 200 or more items, items occurring more than 1% of the
/// time are not used to seed matches.
struct SequenceMatcher<'a> {
    a: &'a [char],
    b: &'a [char],
    b2j: HashMap<char, Vec<usize>>,
}

impl<'a> SequenceMatcher<'a> {
    fn new(a: &'a [char], b: &'a [char]) -> Self {
        let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, &c) in b.iter().enumerate() {
            b2j.entry(c).or_default().push(j);
        }
        if b.len() >= 200 {
            let ntest = b.len() / 100 + 1;
            b2j.retain(|_, idxs| idxs.len() <= ntest);
        }
        Self { a, b, b2j }
    }

    fn find_longest_match(&self, alo: usize, ahi: usize, blo: usize, bhi: usize) -> (usize, usize, usize) {
        let (mut besti, mut bestj, mut bestsize) = (alo, blo, 0usize);
        let mut j2len: HashMap<usize, usize> = HashMap::new();

        for i in alo..ahi {
            let mut new_j2len: HashMap<usize, usize> = HashMap::new();
            if let Some(idxs) = self.b2j.get(&self.a[i]) {
                for &j in idxs {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let k = j.checked_sub(1).and_then(|p| j2len.get(&p)).copied().unwrap_or(0) + 1;
                    new_j2len.insert(j, k);
                    if k > bestsize {
                        besti = i + 1 - k;
                        bestj = j + 1 - k;
                        bestsize = k;
                    }
                }
            }
            j2len = new_j2len;
        }

        while besti > alo && bestj > blo && self.a[besti - 1] == self.b[bestj - 1] {
            besti -= 1;
            bestj -= 1;
            bestsize += 1;
        }
        while besti + bestsize < ahi && bestj + bestsize < bhi && self.a[besti + bestsize] == self.b[bestj + bestsize] {
            bestsize += 1;
        }
        (besti, bestj, bestsize)
    }

    fn matching_blocks(&self) -> Vec<(usize, usize, usize)> {
        let mut queue = vec![(0, self.a.len(), 0, self.b.len())];
        let mut blocks = Vec::new();

        while let Some((alo, ahi, blo, bhi)) = queue.pop() {
            let (i, j, k) = self.find_longest_match(alo, ahi, blo, bhi);
            if k == 0 {
                continue;
            }
            blocks.push((i, j, k));
            if alo < i && blo < j {
                queue.push((alo, i, blo, j));
            }
            if i + k < ahi && j + k < bhi {
                queue.push((i + k, ahi, j + k, bhi));
            }
        }
        blocks.sort_unstable();
        blocks
    }
}
