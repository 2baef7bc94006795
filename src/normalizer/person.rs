//! Vietnamese person-name detection.
//!
//! Text is split on Unicode word boundaries and each token classified as a
//! title, a capitalized word, a company-suffix keyword or something else.
//! Capitalized tokens joined by single spaces form a run. Accepted shapes:
//!
//! - a title followed by a run of one to four words (`Ông Nguyễn Văn An`);
//!   only the run is reported, the title stays in the text
//! - a run of three to five words without a title (`Trần Thị Bích`)
//!
//! A run containing a suffix keyword (`Công`, `Group`, `Bank`...) names an
//! organization and is rejected.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;
use unicode_segmentation::UnicodeSegmentation;

const MAX_TITLED_NAME_WORDS: usize = 4;
const MIN_UNTITLED_NAME_WORDS: usize = 3;
const MAX_UNTITLED_NAME_WORDS: usize = 5;

lazy_static! {
    static ref CAPITALIZED_WORD: Regex = Regex::new(r"^\p{Lu}[\p{Ll}\p{M}]*$").unwrap();
    static ref LEADING_UPPERCASE: Regex = Regex::new(r"^\p{Lu}").unwrap();

    static ref TITLES: HashSet<&'static str> = [
        "ông", "bà", "anh", "chị", "cô", "chú", "bác", "ngài",
        "mr", "mrs", "ms", "dr", "ts", "ths", "pgs", "gs", "ls",
    ]
    .into_iter()
    .collect();

    static ref SUFFIX_KEYWORDS: HashSet<&'static str> = [
        "công", "ty", "tập", "đoàn", "ngân", "hàng", "tổng", "cổ", "phần", "tnhh",
        "group", "corp", "corporation", "company", "jsc", "ltd", "inc", "joint", "stock",
        "bank", "holdings", "software", "telecom", "vietnam", "việt",
    ]
    .into_iter()
    .collect();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenClass {
    Title,
    CapitalizedWord,
    SuffixKeyword,
    Space,
    Period,
    Other,
}

#[derive(Debug, Clone)]
struct Token {
    class: TokenClass,
    capitalized: bool,
    start: usize,
    end: usize,
}

impl Token {
    /// Tokens that may sit inside a name run
    fn is_wordlike(&self) -> bool {
        match self.class {
            TokenClass::CapitalizedWord | TokenClass::SuffixKeyword => true,
            TokenClass::Title => self.capitalized,
            _ => false,
        }
    }
}

fn classify(word: &str) -> (TokenClass, bool) {
    match word {
        " " => return (TokenClass::Space, false),
        "." => return (TokenClass::Period, false),
        _ => {}
    }
    let capitalized = LEADING_UPPERCASE.is_match(word);
    let lowered = word.to_lowercase();
    // Lowercase keywords ("khách hàng") are ordinary words
    if capitalized && SUFFIX_KEYWORDS.contains(lowered.as_str()) {
        return (TokenClass::SuffixKeyword, true);
    }
    if TITLES.contains(lowered.as_str()) {
        return (TokenClass::Title, capitalized);
    }
    if CAPITALIZED_WORD.is_match(word) {
        return (TokenClass::CapitalizedWord, true);
    }
    (TokenClass::Other, capitalized)
}

fn lex(text: &str, blocked: &[Range<usize>]) -> Vec<Token> {
    text.split_word_bound_indices()
        .map(|(start, word)| {
            let end = start + word.len();
            let (class, capitalized) = if blocked.iter().any(|r| start < r.end && r.start < end) {
                (TokenClass::Other, false)
            } else {
                classify(word)
            };
            Token {
                class,
                capitalized,
                start,
                end,
            }
        })
        .collect()
}

struct Run {
    span: Range<usize>,
    words: usize,
    has_suffix: bool,
    next: usize,
}

/// Collects space-joined word-like tokens starting at `start`.
fn collect_run(tokens: &[Token], start: usize) -> Option<Run> {
    let first = tokens.get(start).filter(|t| t.is_wordlike())?;
    let mut run = Run {
        span: first.start..first.end,
        words: 0,
        has_suffix: false,
        next: start,
    };

    let mut i = start;
    loop {
        let token = &tokens[i];
        run.words += 1;
        run.has_suffix |= token.class == TokenClass::SuffixKeyword;
        run.span.end = token.end;
        i += 1;

        let joined = tokens.get(i).map(|t| t.class) == Some(TokenClass::Space)
            && tokens.get(i + 1).is_some_and(Token::is_wordlike);
        if !joined {
            break;
        }
        i += 1;
    }
    run.next = i;
    Some(run)
}

/// Index of the first name token after a title at `title`, allowing an
/// optional period ("Mr. Tran").
fn after_title(tokens: &[Token], title: usize) -> Option<usize> {
    let mut i = title + 1;
    if tokens.get(i).map(|t| t.class) == Some(TokenClass::Period) {
        i += 1;
    }
    (tokens.get(i).map(|t| t.class) == Some(TokenClass::Space)).then_some(i + 1)
}

/// Byte ranges of person names in `text`, skipping anything inside `blocked`.
pub fn find_person_spans(text: &str, blocked: &[Range<usize>]) -> Vec<Range<usize>> {
    let tokens = lex(text, blocked);
    let mut spans = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        if tokens[i].class == TokenClass::Title {
            if let Some(run) = after_title(&tokens, i).and_then(|j| collect_run(&tokens, j)) {
                if !run.has_suffix && run.words <= MAX_TITLED_NAME_WORDS {
                    spans.push(run.span);
                    i = run.next;
                    continue;
                }
            }
        }

        if let Some(run) = collect_run(&tokens, i) {
            if !run.has_suffix
                && (MIN_UNTITLED_NAME_WORDS..=MAX_UNTITLED_NAME_WORDS).contains(&run.words)
            {
                spans.push(run.span);
            }
            // Skip the whole run so a rejected organization does not yield a
            // shorter person match
            i = run.next;
            continue;
        }
        i += 1;
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(text: &str) -> Vec<&str> {
        find_person_spans(text, &[])
            .into_iter()
            .map(|r| &text[r])
            .collect()
    }

    #[test]
    fn test_titled_names() {
        assert_eq!(names("Ông Nguyễn Văn An đã ký hợp đồng"), vec!["Nguyễn Văn An"]);
        assert_eq!(names("gặp bà Lê Thị Hoa hôm qua"), vec!["Lê Thị Hoa"]);
        assert_eq!(names("Mr. Tran Minh gửi email"), vec!["Tran Minh"]);
    }

    #[test]
    fn test_untitled_three_word_names() {
        assert_eq!(
            names("Khách hàng Trần Thị Bích yêu cầu xóa dữ liệu"),
            vec!["Trần Thị Bích"]
        );
        // A title word can also be part of a name
        assert_eq!(names("Nguyễn Thị Anh nộp đơn"), vec!["Nguyễn Thị Anh"]);
        // Two capitalized words without a title are not enough
        assert!(names("Hà Nội là thủ đô").is_empty());
    }

    #[test]
    fn test_suffix_keywords_reject_candidates() {
        assert!(names("Công Ty Cổ Phần Minh Long thu thập dữ liệu").is_empty());
        assert!(names("Vingroup Holdings Joint Stock thông báo").is_empty());
        assert!(names("ông Hoàng Group phát biểu").is_empty());
    }

    #[test]
    fn test_blocked_ranges_are_skipped() {
        let text = "Nguyễn Văn An làm việc";
        let blocked = vec![0..text.find(" làm").unwrap()];
        assert!(find_person_spans(text, &blocked).is_empty());
    }

    #[test]
    fn test_acronyms_are_not_names() {
        assert!(names("VCB BIDV MB chia sẻ dữ liệu").is_empty());
    }
}
