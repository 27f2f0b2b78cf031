//! Sort-key normalisation for display titles.
//!
//! "The 40-Year-Old Virgin" sorts as "forty year old virgin" so that titles
//! starting with articles or digits land where a human would look for them.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LEADING_NUMBER: Regex = Regex::new(r"^(\d+)(st|nd|rd|th)?$").unwrap();
}

/// Normalise a display title into a lower-case sort key.
pub fn sort_title(title: &str) -> String {
    let lowered = title
        .trim()
        .to_lowercase()
        .replace('&', " and ")
        .replace('-', " ");
    let kept: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    let mut words: Vec<String> = kept.split_whitespace().map(str::to_string).collect();
    if words.is_empty() {
        return String::new();
    }

    if matches!(words[0].as_str(), "a" | "an" | "the") {
        if words.len() == 1 {
            return words.remove(0);
        }
        words.remove(0);
    }

    if let Some(caps) = LEADING_NUMBER.captures(&words[0]) {
        if let Ok(n) = caps[1].parse::<u64>() {
            let mut spelled = number_words(n, caps.get(2).is_some());
            spelled.extend(words.drain(1..));
            words = spelled;
        }
    }

    words.join(" ")
}

const ONES: [&str; 20] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const ORDINAL_TENS: [&str; 10] = [
    "", "", "twentieth", "thirtieth", "fortieth", "fiftieth", "sixtieth", "seventieth",
    "eightieth", "ninetieth",
];

fn small_ordinal(n: u64) -> String {
    match n {
        0 => "zeroth".to_string(),
        1 => "first".to_string(),
        2 => "second".to_string(),
        3 => "third".to_string(),
        5 => "fifth".to_string(),
        8 => "eighth".to_string(),
        9 => "ninth".to_string(),
        12 => "twelfth".to_string(),
        _ => format!("{}th", ONES[n as usize]),
    }
}

/// Spell `n` out in English words, as an ordinal when asked.
///
/// Numbers from 1100 to 2999 (other than 2000-2009) read as years:
/// 1917 is "nineteen seventeen".
pub fn number_words(n: u64, ordinal: bool) -> Vec<String> {
    if n < 20 {
        let word = if ordinal { small_ordinal(n) } else { ONES[n as usize].to_string() };
        return vec![word];
    }

    if n < 100 {
        let (q, r) = ((n / 10) as usize, n % 10);
        if r == 0 {
            let word = if ordinal { ORDINAL_TENS[q] } else { TENS[q] };
            return vec![word.to_string()];
        }
        let rest = number_words(r, ordinal);
        return vec![format!("{}-{}", TENS[q], rest[0])];
    }

    if n < 1000 {
        return scaled(n, 100, "hundred", ordinal);
    }

    if !ordinal && (1100..3000).contains(&n) && !(2000..2010).contains(&n) {
        let (q, r) = (n / 100, n % 100);
        let mut words = number_words(q, false);
        if r < 10 {
            words.push("hundred".to_string());
        }
        if r > 0 {
            words.extend(number_words(r, false));
        }
        return words;
    }

    if n < 1_000_000 {
        return scaled(n, 1_000, "thousand", ordinal);
    }
    if n < 1_000_000_000 {
        return scaled(n, 1_000_000, "million", ordinal);
    }
    scaled(n, 1_000_000_000, "billion", ordinal)
}

fn scaled(n: u64, unit: u64, name: &str, ordinal: bool) -> Vec<String> {
    let (q, r) = (n / unit, n % unit);
    let mut words = number_words(q, false);
    words.push(name.to_string());
    if r > 0 {
        words.extend(number_words(r, ordinal));
    } else if ordinal {
        if let Some(last) = words.last_mut() {
            last.push_str("th");
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_title() {
        let cases = [
            ("The Gumball Rally", "gumball rally"),
            ("1917", "nineteen seventeen"),
            ("9 to 5", "nine to 5"),
            ("It's Garry Shandling's Show", "its garry shandlings show"),
            ("The 40-Year-Old Virgin", "forty year old virgin"),
            ("42nd Street", "forty-second street"),
            ("The 30th Floor", "thirtieth floor"),
            ("The 501st Legion", "five hundred first legion"),
            ("The 600th Floor", "six hundredth floor"),
            ("350000000 Years of Solitude", "three hundred fifty million years of solitude"),
            ("Fast & Furious", "fast and furious"),
            ("A", "a"),
            ("   ", ""),
        ];
        for (input, want) in cases {
            assert_eq!(sort_title(input), want, "sort_title({:?})", input);
        }
    }

    #[test]
    fn test_number_words() {
        assert_eq!(number_words(12, true), vec!["twelfth"]);
        assert_eq!(number_words(4, true), vec!["fourth"]);
        assert_eq!(number_words(2001, false), vec!["two", "thousand", "one"]);
        assert_eq!(number_words(1905, false), vec!["nineteen", "hundred", "five"]);
        assert_eq!(number_words(1000, true), vec!["one", "thousandth"]);
        assert_eq!(number_words(1100, true), vec!["one", "thousand", "one", "hundredth"]);
        assert_eq!(number_words(3_000_000_000, false), vec!["three", "billion"]);
    }
}
