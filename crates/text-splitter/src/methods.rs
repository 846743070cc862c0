//! Segmentation methods.

/// Sentence-ending and clause punctuation used by [`split_sentences`].
const SENTENCE_SPLITS: &[char] = &[
    '，', '。', '？', '！', ',', '.', '?', '!', '~', ':', '：', '—', '…',
];

/// Punctuation recognised by `cut5`.
const ALL_PUNCTUATION: &[char] = &[
    ',', '.', ';', '?', '!', '、', '，', '。', '？', '！', '；', '：', '…',
];

/// A named way of cutting text into synthesis fragments.
pub trait SplitMethod: Send + Sync + std::fmt::Debug {
    /// Registered name.
    fn name(&self) -> &str;

    /// Short human-readable description.
    fn description(&self) -> &str;

    /// Cut `text` into fragments. Fragments keep their punctuation.
    fn split(&self, text: &str) -> Vec<String>;
}

/// Create the built-in methods `cut0` through `cut5`.
pub fn default_methods() -> Vec<Box<dyn SplitMethod>> {
    vec![
        Box::new(NoSplit),
        Box::new(FourSentences),
        Box::new(FiftyChars),
        Box::new(ChinesePeriod),
        Box::new(EnglishPeriod),
        Box::new(AllPunctuation),
    ]
}

/// Split after every sentence punctuation mark, keeping the mark.
fn split_sentences(text: &str) -> Vec<String> {
    let mut text = text.replace("……", "。").replace("——", "，");
    if let Some(last) = text.chars().last() {
        if !SENTENCE_SPLITS.contains(&last) {
            text.push('。');
        }
    }

    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if SENTENCE_SPLITS.contains(&c) {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn is_punctuation_only(fragment: &str) -> bool {
    fragment
        .chars()
        .all(|c| c.is_whitespace() || ALL_PUNCTUATION.contains(&c) || SENTENCE_SPLITS.contains(&c))
}

/// Drop empty and punctuation-only fragments.
fn keep_spoken(fragments: Vec<String>) -> Vec<String> {
    fragments
        .into_iter()
        .filter(|f| !is_punctuation_only(f))
        .collect()
}

/// `cut0`: the whole text as one fragment.
#[derive(Debug)]
pub struct NoSplit;

impl SplitMethod for NoSplit {
    fn name(&self) -> &str {
        "cut0"
    }

    fn description(&self) -> &str {
        "no split"
    }

    fn split(&self, text: &str) -> Vec<String> {
        keep_spoken(vec![text.to_string()])
    }
}

/// `cut1`: groups of four sentences.
#[derive(Debug)]
pub struct FourSentences;

impl SplitMethod for FourSentences {
    fn name(&self) -> &str {
        "cut1"
    }

    fn description(&self) -> &str {
        "every four sentences"
    }

    fn split(&self, text: &str) -> Vec<String> {
        let sentences = split_sentences(text);
        let groups = sentences.chunks(4).map(|group| group.concat()).collect();
        keep_spoken(groups)
    }
}

/// `cut2`: fragments of at least fifty characters.
#[derive(Debug)]
pub struct FiftyChars;

const FIFTY: usize = 50;

impl SplitMethod for FiftyChars {
    fn name(&self) -> &str {
        "cut2"
    }

    fn description(&self) -> &str {
        "about fifty characters"
    }

    fn split(&self, text: &str) -> Vec<String> {
        let sentences = split_sentences(text);
        let mut out: Vec<String> = Vec::new();
        let mut current = String::new();
        for sentence in sentences {
            current.push_str(&sentence);
            if current.chars().count() > FIFTY {
                out.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
        // A short tail rides with its predecessor.
        if out.len() > 1 && out[out.len() - 1].chars().count() < FIFTY {
            if let Some(tail) = out.pop() {
                if let Some(prev) = out.last_mut() {
                    prev.push_str(&tail);
                }
            }
        }
        keep_spoken(out)
    }
}

/// `cut3`: on the Chinese full stop.
#[derive(Debug)]
pub struct ChinesePeriod;

impl SplitMethod for ChinesePeriod {
    fn name(&self) -> &str {
        "cut3"
    }

    fn description(&self) -> &str {
        "on chinese full stop"
    }

    fn split(&self, text: &str) -> Vec<String> {
        let trimmed = text.trim_matches('\n').trim_matches('。');
        let parts = trimmed.split('。').map(|s| format!("{s}。")).collect();
        keep_spoken(parts)
    }
}

/// `cut4`: on the English period, ignoring decimal points.
#[derive(Debug)]
pub struct EnglishPeriod;

impl SplitMethod for EnglishPeriod {
    fn name(&self) -> &str {
        "cut4"
    }

    fn description(&self) -> &str {
        "on english period"
    }

    fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.trim_matches('.').chars().collect();
        let mut out = Vec::new();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            let decimal = c == '.'
                && i > 0
                && chars[i - 1].is_ascii_digit()
                && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
            if c == '.' && !decimal {
                current.push('.');
                out.push(std::mem::take(&mut current));
            } else {
                current.push(c);
            }
        }
        if !current.is_empty() {
            current.push('.');
            out.push(current);
        }
        keep_spoken(out)
    }
}

/// `cut5`: on every punctuation mark.
#[derive(Debug)]
pub struct AllPunctuation;

impl SplitMethod for AllPunctuation {
    fn name(&self) -> &str {
        "cut5"
    }

    fn description(&self) -> &str {
        "on every punctuation mark"
    }

    fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.trim().chars().collect();
        let mut out: Vec<String> = Vec::new();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            current.push(c);
            if !ALL_PUNCTUATION.contains(&c) {
                continue;
            }
            let decimal = c == '.'
                && i > 0
                && chars[i - 1].is_ascii_digit()
                && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
            if decimal {
                continue;
            }
            let piece = std::mem::take(&mut current);
            // Runs of punctuation stay with the words before them.
            match out.last_mut() {
                Some(prev) if is_punctuation_only(&piece) => prev.push_str(&piece),
                _ => out.push(piece),
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
        keep_spoken(out.into_iter().map(|f| f.trim().to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_split() {
        assert_eq!(NoSplit.split("a, b. c"), vec!["a, b. c"]);
        assert!(NoSplit.split("...").is_empty());
    }

    #[test]
    fn test_four_sentences() {
        let parts = FourSentences.split("一。二。三。四。五。");
        assert_eq!(parts, vec!["一。二。三。四。", "五。"]);
    }

    #[test]
    fn test_fifty_chars_merges_short_tail() {
        let long = "a".repeat(60);
        let text = format!("{long}. short.");
        let parts = FiftyChars.split(&text);
        assert_eq!(parts.len(), 1);
        assert!(parts[0].ends_with("short."));
    }

    #[test]
    fn test_chinese_period() {
        assert_eq!(ChinesePeriod.split("你好。世界。"), vec!["你好。", "世界。"]);
    }

    #[test]
    fn test_english_period_keeps_decimals() {
        let parts = EnglishPeriod.split("Pi is 3.14. Next sentence.");
        assert_eq!(parts, vec!["Pi is 3.14.", " Next sentence."]);
    }

    #[test]
    fn test_all_punctuation() {
        let parts = AllPunctuation.split("Hello, world! How are you?");
        assert_eq!(parts, vec!["Hello,", "world!", "How are you?"]);
    }

    #[test]
    fn test_all_punctuation_merges_runs() {
        let parts = AllPunctuation.split("Wait... what?!");
        assert_eq!(parts, vec!["Wait...", "what?!"]);
    }

    #[test]
    fn test_default_methods_names() {
        let names: Vec<_> = default_methods()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(names, vec!["cut0", "cut1", "cut2", "cut3", "cut4", "cut5"]);
    }
}
