//! Token scanners for drafted answers.
//!
//! Two kinds of claims are extracted: name-like runs of capitalized words
//! and currency-like numbers. Both scanners are narrow: plain
//! lower-case prose and bare integers ("4 records") are never claims.

use std::sync::OnceLock;

use regex::Regex;

use crate::filter::normalize_text;
use crate::time::MONTH_NAMES;

/// Lower-case words that may sit inside a multi-word name.
const CONNECTORS: &[&str] = &["&", "de", "del", "la", "las", "los", "of", "the", "van", "von", "da"];

/// Words that never make a name on their own (normalized). Sentence
/// starters belong here; a capitalized word outside this list is a claim
/// wherever it sits.
const COMMON_WORDS: &[&str] = &[
    "a", "about", "above", "according", "across", "add", "additionally", "after", "again", "all",
    "also", "although", "altogether", "among", "amount", "amounts", "an", "and", "answer", "any",
    "approximately", "are", "around", "as", "ask", "at", "average", "based", "because", "before",
    "below", "between", "biggest", "both", "breakdown", "but", "by", "cancelled", "certainly",
    "change", "clearly", "combined", "compared", "comparison", "confirmed", "count", "current",
    "currently", "customer", "customers", "data", "decrease", "did", "do", "does", "down", "draft",
    "during", "each", "either", "every", "fewer", "finally", "first", "for", "found", "from",
    "good", "grand", "great", "gross", "group", "groups", "growth", "had", "has", "have", "hello",
    "here", "highest", "how", "however", "i", "if", "in", "increase", "insight", "insights",
    "instead", "invoice", "invoices", "is", "it", "its", "just", "key", "largest", "last",
    "leading", "less", "let", "like", "lowest", "main", "meanwhile", "month", "more", "most", "net",
    "new", "next", "no", "none", "not", "notably", "note", "nothing", "of", "on", "one", "only",
    "or", "order", "orders", "other", "others", "our", "over", "overall", "overdue", "paid",
    "partner", "partners", "pending", "percent", "period", "please", "posted", "previous",
    "product", "products", "purchase", "purchases", "quarter", "recently", "record", "records",
    "report", "result", "results", "revenue", "roughly", "sale", "sales", "second", "see", "share",
    "since", "smallest", "so", "some", "sorry", "state", "status", "still", "summary", "supplier",
    "suppliers", "sure", "than", "thanks", "that", "the", "their", "then", "there", "these", "they",
    "this", "those", "three", "thus", "to", "today", "top", "total", "totals", "trend", "two",
    "under", "unfortunately", "unlike", "unpaid", "up", "vendor", "vendors", "versus", "vs",
    "warning", "was", "we", "week", "were", "what", "when", "which", "while", "who", "why", "with",
    "year", "yes", "yesterday", "you", "your",
    // Spanish
    "ademas", "al", "ano", "aqui", "cantidad", "como", "comparado", "con", "cual", "cuando",
    "durante", "el", "embargo", "en", "encontre", "entre", "esa", "ese", "eso", "esta", "estas",
    "este", "esto", "estos", "factura", "facturas", "fue", "fueron", "hay", "hola", "hubo",
    "importe", "lamentablemente", "mas", "mayor", "menor", "menos", "mes", "monto", "nota",
    "nuestro", "para", "pedidos", "periodo", "por", "primer", "primero", "principal", "principales",
    "productos", "proveedores", "que", "quien", "resultado", "resumen", "se", "segun", "si", "sin",
    "sobre", "solo", "su", "sus", "tambien", "ultimo", "un", "una", "venta", "ventas", "y",
];

const WEEKDAYS: &[&str] = &[
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "lunes", "martes",
    "miercoles", "jueves", "viernes", "sabado", "domingo",
];

/// ISO codes accepted as currency markers.
pub(crate) const CURRENCY_CODES: &[&str] = &["USD", "EUR", "ARS", "MXN", "CLP", "COP", "PEN", "GBP"];

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\p{L}\p{N}&](?:[\p{L}\p{N}&'’\-]|\.[\p{L}\p{N}])*").expect("static regex is valid")
    })
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let codes = CURRENCY_CODES.join("|");
        let pattern = format!(
            r"(?P<prefix>US\$|\$|€|£|\b(?:{codes})\s?)?(?P<sign>-)?(?P<num>\d+(?:[.,]\d+)*)(?P<suffix>\s?%|\s?(?:MM|M|k|K)\b|\s(?:{codes})\b)?"
        );
        Regex::new(&pattern).expect("static regex is valid")
    })
}

/// Normalized text with punctuation turned into spaces.
///
/// `&` survives so "Johnson & Johnson" keeps its shape.
pub(crate) fn fold(text: &str) -> String {
    let spaced: String = normalize_text(text)
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '&' { c } else { ' ' })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_connector(word: &str) -> bool {
    CONNECTORS.contains(&normalize_text(word).as_str())
}

pub(crate) fn is_common(word: &str) -> bool {
    let w = fold(word);
    COMMON_WORDS.contains(&w.as_str())
        || WEEKDAYS.contains(&w.as_str())
        || MONTH_NAMES.iter().any(|(name, _)| *name == w)
        || CURRENCY_CODES.iter().any(|c| c.eq_ignore_ascii_case(&w))
        || matches!(w.as_str(), "q1" | "q2" | "q3" | "q4")
}

fn is_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(char::is_uppercase)
}

fn is_inline_gap(gap: &str) -> bool {
    !gap.is_empty() && gap.chars().all(|c| c == ' ' || c == '\t')
}

struct Word<'a> {
    text: &'a str,
    /// Whitespace-only gap to the previous word.
    joined: bool,
}

fn words(text: &str) -> Vec<Word<'_>> {
    let mut out = Vec::new();
    let mut last_end = 0;
    for m in word_re().find_iter(text) {
        let gap = &text[last_end..m.start()];
        out.push(Word {
            text: m.as_str(),
            joined: last_end > 0 && is_inline_gap(gap),
        });
        last_end = m.end();
    }
    out
}

/// Name-like candidates in a drafted answer, in order of appearance.
///
/// A candidate is a run of capitalized words, optionally joined by lower-case
/// connectors ("Banco de Chile", "Johnson & Johnson"). Common words at
/// either end are stripped, so a sentence opener never becomes a claim but a
/// leading "Initech" does.
pub(crate) fn name_candidates(text: &str) -> Vec<String> {
    let words = words(text);
    let mut out = Vec::new();
    let mut i = 0;
    while i < words.len() {
        if !is_capitalized(words[i].text) {
            i += 1;
            continue;
        }
        let mut run = vec![i];
        let mut j = i + 1;
        while j < words.len() && words[j].joined {
            if is_capitalized(words[j].text) {
                run.push(j);
                j += 1;
            } else if is_connector(words[j].text)
                && j + 1 < words.len()
                && words[j + 1].joined
                && is_capitalized(words[j + 1].text)
            {
                run.push(j);
                run.push(j + 1);
                j += 2;
            } else {
                break;
            }
        }
        i = j;

        let mut kept: &[usize] = &run;
        while let Some((&head, rest)) = kept.split_first() {
            if is_common(words[head].text) || is_connector(words[head].text) {
                kept = rest;
            } else {
                break;
            }
        }
        while let Some((&tail, rest)) = kept.split_last() {
            if is_common(words[tail].text) || is_connector(words[tail].text) {
                kept = rest;
            } else {
                break;
            }
        }
        if kept.is_empty() {
            continue;
        }
        let phrase: Vec<&str> = kept.iter().map(|&k| words[k].text).collect();
        out.push(phrase.join(" "));
    }
    out
}

/// A currency-like number found in text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AmountToken {
    /// The matched text.
    pub text: String,
    /// Possible values (two when the separator is ambiguous).
    pub readings: Vec<Reading>,
}

/// One interpretation of an amount token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Reading {
    /// The amount as read.
    pub value: f64,
    /// Half a unit in the last written digit, scaled by any multiplier.
    pub rounding: f64,
}

fn reading(int_digits: &str, frac_digits: &str, multiplier: f64) -> Option<Reading> {
    let literal = if frac_digits.is_empty() {
        int_digits.to_string()
    } else {
        format!("{int_digits}.{frac_digits}")
    };
    let value: f64 = literal.parse().ok()?;
    let decimals = i32::try_from(frac_digits.len()).unwrap_or(i32::MAX);
    Some(Reading {
        value: value * multiplier,
        rounding: 0.5 * 10f64.powi(-decimals) * multiplier,
    })
}

/// Interprets `1,234.56`, `1.234,56`, `1,234` and friends.
///
/// A single separator followed by exactly three digits is ambiguous and
/// yields both the thousands and the decimal reading.
pub(crate) fn parse_number(num: &str, multiplier: f64) -> Vec<Reading> {
    let last_dot = num.rfind('.');
    let last_comma = num.rfind(',');
    let strip = |s: &str| s.chars().filter(char::is_ascii_digit).collect::<String>();
    let split_at = |pos: usize| (strip(&num[..pos]), strip(&num[pos + 1..]));
    let readings = match (last_dot, last_comma) {
        (None, None) => vec![reading(num, "", multiplier)],
        (Some(d), Some(c)) => {
            let (int, frac) = split_at(d.max(c));
            vec![reading(&int, &frac, multiplier)]
        }
        (Some(pos), None) | (None, Some(pos)) => {
            let sep = num.as_bytes()[pos];
            let occurrences = num.bytes().filter(|b| *b == sep).count();
            let (int, frac) = split_at(pos);
            if occurrences > 1 {
                vec![reading(&strip(num), "", multiplier)]
            } else if frac.len() == 3 {
                vec![reading(&strip(num), "", multiplier), reading(&int, &frac, multiplier)]
            } else {
                vec![reading(&int, &frac, multiplier)]
            }
        }
    };
    readings.into_iter().flatten().collect()
}

fn suffix_multiplier(suffix: &str) -> f64 {
    match suffix.trim() {
        "k" | "K" => 1_000.0,
        "M" | "MM" => 1_000_000.0,
        _ => 1.0,
    }
}

/// Every number in `text`, currency-like or not, as `(text, readings,
/// currency_like)`.
fn numbers(text: &str) -> Vec<(String, Vec<Reading>, bool)> {
    let mut out = Vec::new();
    for caps in number_re().captures_iter(text) {
        let (Some(whole), Some(num)) = (caps.get(0), caps.name("num")) else {
            continue;
        };
        let prefix = caps.name("prefix");
        let suffix = caps.name("suffix");
        let before = text[..whole.start()].chars().next_back();
        if prefix.is_none() && before.is_some_and(char::is_alphanumeric) {
            continue;
        }
        if text[whole.end()..].chars().next().is_some_and(char::is_alphanumeric) {
            continue;
        }
        let multiplier = suffix.map_or(1.0, |s| suffix_multiplier(s.as_str()));
        let currency_like = prefix.is_some() || suffix.is_some() || num.as_str().contains(['.', ',']);
        out.push((
            whole.as_str().trim().to_string(),
            parse_number(num.as_str(), multiplier),
            currency_like,
        ));
    }
    out
}

/// Currency-like numbers: a currency marker, a `%` or `k`/`M` suffix, or a
/// decimal/thousands separator.
pub(crate) fn amount_tokens(text: &str) -> Vec<AmountToken> {
    numbers(text)
        .into_iter()
        .filter(|(_, readings, currency_like)| *currency_like && !readings.is_empty())
        .map(|(text, readings, _)| AmountToken { text, readings })
        .collect()
}

/// Values of every number in `text`, currency-like or not.
pub(crate) fn all_number_values(text: &str) -> Vec<f64> {
    numbers(text)
        .into_iter()
        .flat_map(|(_, readings, _)| readings.into_iter().map(|r| r.value))
        .collect()
}

/// True if the text states a zero: a numeric zero or the word itself.
pub(crate) fn states_zero(text: &str) -> bool {
    let folded = fold(text);
    folded.split(' ').any(|w| w == "zero" || w == "cero")
        || numbers(text)
            .iter()
            .any(|(_, readings, _)| readings.iter().any(|r| r.value == 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_candidates_runs_and_connectors() {
        let found = name_candidates("Sales went to Banco de Chile and Johnson & Johnson, not Acme Corp.");
        assert_eq!(found, vec!["Banco de Chile", "Johnson & Johnson", "Acme Corp"]);
    }

    #[test]
    fn test_sentence_starters_are_not_names() {
        let found = name_candidates("Revenue grew. Clearly it did. Overall, CustomerC led.");
        assert_eq!(found, vec!["CustomerC"]);
    }

    #[test]
    fn test_leading_single_word_names_are_candidates() {
        assert_eq!(name_candidates("Initech bought $120.00."), vec!["Initech"]);
        assert_eq!(name_candidates("- Initech: $120.00"), vec!["Initech"]);
        assert_eq!(
            name_candidates("Top customers:\n- Initech: $120.00\n1. Globex: $30.00"),
            vec!["Initech", "Globex"]
        );
    }

    #[test]
    fn test_leading_common_words_stripped() {
        let found = name_candidates("The Acme account and Top Customers: 1. CustomerA Orders");
        assert_eq!(found, vec!["Acme", "CustomerA"]);
    }

    #[test]
    fn test_months_and_quarters_are_not_names() {
        assert!(name_candidates("In May 2024 and Q2 sales rose, per USD figures.").is_empty());
    }

    #[test]
    fn test_and_splits_names() {
        let found = name_candidates("We sold to CustomerA and CustomerC.");
        assert_eq!(found, vec!["CustomerA", "CustomerC"]);
    }

    #[test]
    fn test_parse_number_formats() {
        let us = parse_number("1,234,567.89", 1.0);
        assert_eq!(us.len(), 1);
        assert!((us[0].value - 1_234_567.89).abs() < 1e-6);

        let es = parse_number("1.234.567,89", 1.0);
        assert!((es[0].value - 1_234_567.89).abs() < 1e-6);

        let ambiguous = parse_number("1,234", 1.0);
        let values: Vec<f64> = ambiguous.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![1234.0, 1.234]);

        let k = parse_number("1.2", 1_000.0);
        assert!((k[0].value - 1200.0).abs() < 1e-9);
        assert!((k[0].rounding - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_amount_tokens_need_currency_shape() {
        let tokens = amount_tokens("4 records in 2024-05-01, total $100, 71.4%, 1.5k and EUR 40 from Q2.");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["$100", "71.4%", "1.5k", "EUR 40"]);
    }

    #[test]
    fn test_states_zero() {
        assert!(states_zero("There were 0 orders."));
        assert!(states_zero("Total: $0.00"));
        assert!(states_zero("cero facturas"));
        assert!(!states_zero("No orders were found, sorry."));
        assert!(!states_zero("10 orders"));
    }
}
