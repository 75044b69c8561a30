//! Canonicalisation and validation helpers for Brazilian judicial data.
//!
//! Validators are pure predicates. Parsers for free-form page values
//! (money, dates) are lenient and return `None` instead of failing.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ScraperError, ScraperResult};

const CNJ_DIGITS: usize = 20;

/// Normalises a process number into the `NNNNNNN-DD.AAAA.J.TR.OOOO` mask.
///
/// Accepts digits-only, space separated or already punctuated input. Any
/// input that does not carry exactly 20 digits is rejected.
pub fn normalizar_numero_processo(numero: &str) -> ScraperResult<String> {
    let digits = somente_digitos(numero);
    if digits.len() != CNJ_DIGITS {
        return Err(ScraperError::Validation(format!(
            "process number must have {CNJ_DIGITS} digits, got {} in '{numero}'",
            digits.len()
        )));
    }

    Ok(format!(
        "{}-{}.{}.{}.{}.{}",
        &digits[0..7],
        &digits[7..9],
        &digits[9..13],
        &digits[13..14],
        &digits[14..16],
        &digits[16..20]
    ))
}

/// Segments of a canonical CNJ number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentosCnj<'a> {
    pub sequencial: &'a str,
    pub digito: &'a str,
    pub ano: &'a str,
    pub justica: &'a str,
    pub tribunal: &'a str,
    pub origem: &'a str,
}

/// Splits a number already in canonical mask form.
pub fn segmentos_cnj(canonico: &str) -> Option<SegmentosCnj<'_>> {
    let caps = CNJ_MASK_RE.captures(canonico)?;
    Some(SegmentosCnj {
        sequencial: caps.get(1)?.as_str(),
        digito: caps.get(2)?.as_str(),
        ano: caps.get(3)?.as_str(),
        justica: caps.get(4)?.as_str(),
        tribunal: caps.get(5)?.as_str(),
        origem: caps.get(6)?.as_str(),
    })
}

/// Computes the two CNJ check digits (ISO 7064 mod 97-10).
pub fn calcular_digito_verificador_cnj(
    sequencial: &str,
    ano: &str,
    justica: &str,
    tribunal: &str,
    origem: &str,
) -> Option<u32> {
    let payload = format!("{sequencial}{ano}{justica}{tribunal}{origem}00");
    if payload.len() != 20 || !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let remainder = payload
        .bytes()
        .fold(0u64, |acc, b| (acc * 10 + u64::from(b - b'0')) % 97);
    Some(98 - remainder as u32)
}

/// True when `numero` is in canonical mask form and its check digits match.
pub fn validar_numero_cnj(numero: &str) -> bool {
    let Some(seg) = segmentos_cnj(numero.trim()) else {
        return false;
    };
    let Ok(informado) = seg.digito.parse::<u32>() else {
        return false;
    };
    calcular_digito_verificador_cnj(seg.sequencial, seg.ano, seg.justica, seg.tribunal, seg.origem)
        == Some(informado)
}

/// CPF check-digit validation. Punctuation is ignored.
pub fn validar_cpf(cpf: &str) -> bool {
    let digits: Vec<u32> = somente_digitos(cpf).chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 11 || digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    let check = |len: usize| -> u32 {
        let sum: u32 = digits[..len]
            .iter()
            .enumerate()
            .map(|(i, d)| d * (len as u32 + 1 - i as u32))
            .sum();
        let rest = (sum * 10) % 11;
        if rest == 10 { 0 } else { rest }
    };

    check(9) == digits[9] && check(10) == digits[10]
}

/// CNPJ check-digit validation. Punctuation is ignored.
pub fn validar_cnpj(cnpj: &str) -> bool {
    const WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

    let digits: Vec<u32> = somente_digitos(cnpj).chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 14 || digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    let check = |len: usize| -> u32 {
        let weights = &WEIGHTS[WEIGHTS.len() - len..];
        let sum: u32 = digits[..len].iter().zip(weights).map(|(d, w)| d * w).sum();
        let rest = sum % 11;
        if rest < 2 { 0 } else { 11 - rest }
    };

    check(12) == digits[12] && check(13) == digits[13]
}

/// Digits-only CPF, or `None` when invalid.
pub fn normalizar_cpf(cpf: &str) -> Option<String> {
    validar_cpf(cpf).then(|| somente_digitos(cpf))
}

/// Digits-only CNPJ, or `None` when invalid.
pub fn normalizar_cnpj(cnpj: &str) -> Option<String> {
    validar_cnpj(cnpj).then(|| somente_digitos(cnpj))
}

/// `000.000.000-00` rendering of a valid CPF.
pub fn formatar_cpf(cpf: &str) -> Option<String> {
    let d = normalizar_cpf(cpf)?;
    Some(format!("{}.{}.{}-{}", &d[0..3], &d[3..6], &d[6..9], &d[9..11]))
}

/// `00.000.000/0000-00` rendering of a valid CNPJ.
pub fn formatar_cnpj(cnpj: &str) -> Option<String> {
    let d = normalizar_cnpj(cnpj)?;
    Some(format!(
        "{}.{}.{}/{}-{}",
        &d[0..2],
        &d[2..5],
        &d[5..8],
        &d[8..12],
        &d[12..14]
    ))
}

/// Parses Brazilian currency strings such as `"R$ 1.234,56"`.
pub fn parsear_valor_monetario(valor: &str) -> Option<f64> {
    let valor = valor.trim();
    if valor.is_empty() {
        return None;
    }

    let raw = MONEY_RE.find(valor)?.as_str();
    let negative = raw.starts_with('-');
    let body = raw.trim_start_matches('-');

    let normalized = if body.contains(',') {
        body.replace('.', "").replace(',', ".")
    } else if body.matches('.').count() > 1 || thousands_only(body) {
        body.replace('.', "")
    } else {
        body.to_string()
    };

    let parsed: f64 = normalized.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    Some(if negative { -parsed } else { parsed })
}

/// Optional-input convenience wrapper for [`parsear_valor_monetario`].
pub fn parsear_valor_opcional(valor: Option<&str>) -> Option<f64> {
    valor.and_then(parsear_valor_monetario)
}

/// Parses `DD/MM/YYYY`, `DD/MM/YY`, `DD-MM-YYYY` and `YYYY-MM-DD`.
///
/// A trailing time (`15/01/2024 10:32`, `2024-01-15T10:32:00`) is ignored.
/// Two-digit years below 70 map to 20xx, the rest to 19xx.
pub fn parsear_data(valor: &str) -> Option<NaiveDate> {
    let token = valor.trim().split([' ', 'T']).next()?.trim();
    if token.is_empty() {
        return None;
    }

    if let Some(caps) = ISO_DATE_RE.captures(token) {
        return ymd(&caps[1], &caps[2], &caps[3]);
    }

    let caps = BR_DATE_RE.captures(token)?;
    let year = match caps[3].len() {
        4 => caps[3].to_string(),
        _ => {
            let short: u32 = caps[3].parse().ok()?;
            let century = if short < 70 { 2000 } else { 1900 };
            (century + short).to_string()
        }
    };
    ymd(&year, &caps[2], &caps[1])
}

/// Collapses whitespace and decodes HTML entities left in scraped text.
pub fn limpar_texto(texto: &str) -> String {
    let decoded = html_escape::decode_html_entities(texto);
    decoded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercases and strips Portuguese diacritics so marker matching is
/// insensitive to case and accents.
pub fn dobrar_texto(texto: &str) -> String {
    texto
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            '\u{a0}' => ' ',
            other => other,
        })
        .collect()
}

pub fn somente_digitos(valor: &str) -> String {
    valor.chars().filter(char::is_ascii_digit).collect()
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn thousands_only(body: &str) -> bool {
    body.split_once('.')
        .is_some_and(|(_, frac)| frac.len() == 3)
}

static CNJ_MASK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{7})-(\d{2})\.(\d{4})\.(\d)\.(\d{2})\.(\d{4})$").expect("invalid cnj regex")
});

static MONEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d[\d.]*(?:,\d+)?").expect("invalid money regex"));

static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("invalid iso date regex"));

static BR_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})[/-](\d{1,2})[/-](\d{4}|\d{2})$").expect("invalid br date regex")
});
