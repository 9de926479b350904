//! 文本归一化与按词边界匹配
//!
//! 客户会混用带重音与不带重音的拼写（"São José" / "sao jose"），所有比较都在
//! 折叠后的文本上进行：NFD 分解、去掉组合符号、转小写。

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// 去重音并转小写
pub fn fold(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

fn bounded(haystack: &str, start: usize, len: usize) -> bool {
    let before_ok = haystack[..start]
        .chars()
        .next_back()
        .map_or(true, |c| !is_word_char(c));
    let after_ok = haystack[start + len..]
        .chars()
        .next()
        .map_or(true, |c| !is_word_char(c));
    before_ok && after_ok
}

/// 所有按词边界出现的位置（两侧都不能是字母或数字）
pub fn word_positions<'a>(haystack: &'a str, needle: &'a str) -> impl Iterator<Item = usize> + 'a {
    haystack
        .match_indices(needle)
        .map(|(i, _)| i)
        .filter(move |&i| !needle.is_empty() && bounded(haystack, i, needle.len()))
}

/// 第一个按词边界出现的位置
pub fn find_word(haystack: &str, needle: &str) -> Option<usize> {
    word_positions(haystack, needle).next()
}

pub fn contains_word(haystack: &str, needle: &str) -> bool {
    find_word(haystack, needle).is_some()
}

/// 文本是否以 needle 开头且其后是词边界
pub fn starts_with_word(haystack: &str, needle: &str) -> bool {
    find_word(haystack, needle) == Some(0)
}

/// 去掉首尾空白与标点，用于「整条消息就是一个城市名」这类判断
pub fn strip_punctuation(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
}
