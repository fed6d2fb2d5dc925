/*
 * Copyright 2025 Paul Moore Parks and contributors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Currency formatting service.
//!
//! ARCHITECTURAL PRINCIPLE: the kernel never touches user-facing text. All
//! formatting flows through the store's formatter, which owns decimal-place
//! and symbol knowledge per currency plus placement per culture.

use rust_decimal::Decimal;

pub trait CurrencyFormatter: Send + Sync {
    fn format_currency(&self, amount: Decimal, currency: &str, culture: &str) -> String;
    fn currency_symbol(&self, currency: &str) -> String;
    fn decimal_places(&self, currency: &str) -> u32;
}

/// Table-driven formatter covering the common ISO-4217 set. Unknown
/// currencies fall back to the code itself as the symbol and two decimal
/// places.
#[derive(Debug, Default)]
pub struct StandardCurrencyFormatter;

// (code, symbol, decimal places)
const CURRENCY_TABLE: &[(&str, &str, u32)] = &[
    ("USD", "$", 2),
    ("EUR", "\u{20ac}", 2),
    ("GBP", "\u{a3}", 2),
    ("SGD", "S$", 2),
    ("MYR", "RM", 2),
    ("AUD", "A$", 2),
    ("CAD", "C$", 2),
    ("CHF", "CHF", 2),
    ("CNY", "\u{a5}", 2),
    ("INR", "\u{20b9}", 2),
    ("THB", "\u{e3f}", 2),
    ("JPY", "\u{a5}", 0),
    ("KRW", "\u{20a9}", 0),
    ("IDR", "Rp", 0),
    ("VND", "\u{20ab}", 0),
    ("BHD", "BD", 3),
    ("KWD", "KD", 3),
    ("OMR", "OMR", 3),
];

fn lookup(currency: &str) -> Option<&'static (&'static str, &'static str, u32)> {
    CURRENCY_TABLE
        .iter()
        .find(|(code, _, _)| code.eq_ignore_ascii_case(currency))
}

/// Cultures that write the decimal comma and place the symbol after the
/// amount.
fn symbol_follows_amount(culture: &str) -> bool {
    let lang = culture.split(['-', '_']).next().unwrap_or("");
    matches!(lang, "de" | "fr" | "es" | "it" | "nl" | "pt" | "fi" | "sv" | "pl")
}

fn group_digits(integral: &str, separator: char) -> String {
    let digits: Vec<char> = integral.chars().collect();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(*c);
    }
    out
}

impl CurrencyFormatter for StandardCurrencyFormatter {
    fn format_currency(&self, amount: Decimal, currency: &str, culture: &str) -> String {
        let places = self.decimal_places(currency);
        let symbol = self.currency_symbol(currency);
        let rounded = amount.round_dp(places);

        let negative = rounded.is_sign_negative();
        let text = rounded.abs().to_string();
        let (integral, fraction) = match text.split_once('.') {
            Some((i, f)) => (i.to_string(), f.to_string()),
            None => (text, String::new()),
        };
        let mut fraction = fraction;
        while (fraction.len() as u32) < places {
            fraction.push('0');
        }

        let (thousands, decimal_point) = if symbol_follows_amount(culture) {
            ('.', ',')
        } else {
            (',', '.')
        };
        let mut number = group_digits(&integral, thousands);
        if places > 0 {
            number.push(decimal_point);
            number.push_str(&fraction);
        }

        let sign = if negative { "-" } else { "" };
        if symbol_follows_amount(culture) {
            format!("{sign}{number} {symbol}")
        } else {
            format!("{sign}{symbol}{number}")
        }
    }

    fn currency_symbol(&self, currency: &str) -> String {
        lookup(currency)
            .map(|(_, symbol, _)| symbol.to_string())
            .unwrap_or_else(|| currency.to_uppercase())
    }

    fn decimal_places(&self, currency: &str) -> u32 {
        lookup(currency).map(|(_, _, places)| *places).unwrap_or(2)
    }
}
