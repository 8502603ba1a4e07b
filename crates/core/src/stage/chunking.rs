//! Splitting stage input into bounded units and merging the results.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::params::TranscriptSegment;

/// A sentence: text up to and including a run of terminal punctuation.
static SENTENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[^.!?]+(?:[.!?]+["')\]]*)?"#).unwrap());

/// Splits synthesis text into chunks.
///
/// A non-empty `delimiter` splits on it verbatim. Otherwise text is split
/// into sentences which are packed greedily into chunks of at most
/// `max_chars` characters; a sentence longer than that is broken at word
/// boundaries. Empty pieces are dropped and order is preserved.
pub fn split_text(text: &str, delimiter: &str, max_chars: usize) -> Vec<String> {
    if !delimiter.is_empty() {
        return text
            .split(delimiter)
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .map(str::to_string)
            .collect();
    }

    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in SENTENCE.find_iter(text) {
        let sentence = collapse_whitespace(sentence.as_str());
        if sentence.is_empty() {
            continue;
        }

        for piece in break_long(&sentence, max_chars) {
            let joined_len = if current.is_empty() {
                char_len(&piece)
            } else {
                char_len(&current) + 1 + char_len(&piece)
            };
            if joined_len > max_chars && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Breaks a sentence longer than `max_chars` at word boundaries, and words
/// longer than `max_chars` at character boundaries.
fn break_long(sentence: &str, max_chars: usize) -> Vec<String> {
    if char_len(sentence) <= max_chars {
        return vec![sentence.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split(' ') {
        let word_len = char_len(word);
        if word_len > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            continue;
        }
        let joined = if current.is_empty() {
            word_len
        } else {
            char_len(&current) + 1 + word_len
        };
        if joined > max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Concatenates per-window transcripts, shifting each window's timestamps by
/// its offset. Segment order and count are preserved.
pub fn merge_transcripts(windows: Vec<(f64, Vec<TranscriptSegment>)>) -> Vec<TranscriptSegment> {
    windows
        .into_iter()
        .flat_map(|(offset, segments)| {
            segments.into_iter().map(move |segment| TranscriptSegment {
                start: segment.start + offset,
                end: segment.end + offset,
                ..segment
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_delimiter() {
        let chunks = split_text("Intro.|Main part.||Outro.", "|", 300);
        assert_eq!(chunks, vec!["Intro.", "Main part.", "Outro."]);
    }

    #[test]
    fn test_sentences_are_packed_up_to_limit() {
        let text = "One two three. Four five six! Seven eight nine? Ten.";
        let chunks = split_text(text, "", 30);
        assert_eq!(
            chunks,
            vec!["One two three. Four five six!", "Seven eight nine? Ten."]
        );
        assert!(chunks.iter().all(|c| c.chars().count() <= 30));
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        assert_eq!(
            split_text("Welcome to the show", "", 300),
            vec!["Welcome to the show"]
        );
    }

    #[test]
    fn test_long_sentence_breaks_at_words() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = split_text(text, "", 12);
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_overlong_word_is_split() {
        let chunks = split_text("abcdefghij", "", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_whitespace_only_yields_nothing() {
        assert!(split_text("   \n  ", "", 300).is_empty());
        assert!(split_text("||", "|", 300).is_empty());
    }

    #[test]
    fn test_merge_transcripts_offsets_and_order() {
        let seg = |start: f64, end: f64, text: &str| TranscriptSegment {
            start,
            end,
            text: text.to_string(),
            speaker: None,
        };
        let merged = merge_transcripts(vec![
            (0.0, vec![seg(0.0, 1.0, "a"), seg(1.0, 2.0, "b")]),
            (600.0, vec![seg(0.5, 1.5, "c")]),
        ]);
        let texts: Vec<_> = merged.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert_eq!(merged[2].start, 600.5);
        assert_eq!(merged[2].end, 601.5);
    }
}
