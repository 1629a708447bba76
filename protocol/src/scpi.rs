/// This module implements the text side of the SCPI dialogue with the analyzer:
/// printf-style command formatting and decoding of numeric replies.
use anyhow::anyhow;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::Error;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScpiRequest {
    Write(String),
    QueryString(String),
}

impl ScpiRequest {
    pub fn command(&self) -> &str {
        match self {
            ScpiRequest::Write(x) => x,
            ScpiRequest::QueryString(x) => x,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScpiResponse {
    Done,
    String(String),
}

/// A single argument substituted into a command template.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Float(f64),
    Int(i64),
    Str(String),
}

impl From<f64> for Arg {
    fn from(x: f64) -> Self {
        Arg::Float(x)
    }
}

impl From<i64> for Arg {
    fn from(x: i64) -> Self {
        Arg::Int(x)
    }
}

impl From<u32> for Arg {
    fn from(x: u32) -> Self {
        Arg::Int(x as i64)
    }
}

impl From<&str> for Arg {
    fn from(x: &str) -> Self {
        Arg::Str(x.to_string())
    }
}

impl From<String> for Arg {
    fn from(x: String) -> Self {
        Arg::Str(x)
    }
}

const NUMBER_PATTERN: &str = r"[-+]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?";

lazy_static! {
    static ref NUMBER: Regex = Regex::new(NUMBER_PATTERN).expect("valid number pattern");
    static ref FIELD: Regex = Regex::new(&format!("^{}$", NUMBER_PATTERN)).expect("valid field pattern");
}

const DEFAULT_PRECISION: usize = 6;

/// Formats `value` like C's `%.<precision>e`, i.e. with a signed exponent of at
/// least two digits (`1.500000000e+09`).
pub fn format_exponential(value: f64, precision: usize) -> String {
    let formatted = format!("{:.*e}", precision, value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exponent) => {
                let sign = if exponent < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exponent.abs())
            }
            Err(_) => formatted,
        },
        None => formatted,
    }
}

fn next_arg<'a, I: Iterator<Item = &'a Arg>>(args: &mut I, conversion: char) -> crate::Result<&'a Arg> {
    args.next()
        .ok_or_else(|| Error::argument(anyhow!("Missing argument for `%{}`", conversion)))
}

fn next_float<'a, I: Iterator<Item = &'a Arg>>(args: &mut I, conversion: char) -> crate::Result<f64> {
    let value = match next_arg(args, conversion)? {
        Arg::Float(x) => *x,
        Arg::Int(x) => *x as f64,
        Arg::Str(x) => {
            return Err(Error::argument(anyhow!(
                "Cannot format string `{}` with `%{}`",
                x,
                conversion
            )))
        }
    };
    if !value.is_finite() {
        return Err(Error::argument(anyhow!("Cannot send non-finite value {}", value)));
    }
    Ok(value)
}

/// Substitutes `args` into a printf-style `template`.
///
/// Supported conversions are `%e`, `%E`, `%f` (with optional `.precision`),
/// `%d`, `%i`, `%s` and the `%%` escape. Every argument must be consumed.
pub fn format_command(template: &str, args: &[Arg]) -> crate::Result<String> {
    let mut ret = String::with_capacity(template.len() + 16);
    let mut args = args.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            ret.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            ret.push('%');
            continue;
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            let value = if digits.is_empty() {
                0
            } else {
                digits
                    .parse::<usize>()
                    .map_err(|_| Error::argument(anyhow!("Invalid precision in `{}`", template)))?
            };
            precision = Some(value);
        }
        let conversion = chars
            .next()
            .ok_or_else(|| Error::argument(anyhow!("Incomplete format specifier in `{}`", template)))?;
        match conversion {
            'e' | 'E' => {
                let value = next_float(&mut args, conversion)?;
                let formatted = format_exponential(value, precision.unwrap_or(DEFAULT_PRECISION));
                if conversion == 'E' {
                    ret.push_str(&formatted.to_uppercase());
                } else {
                    ret.push_str(&formatted);
                }
            }
            'f' => {
                let value = next_float(&mut args, conversion)?;
                ret.push_str(&format!("{:.*}", precision.unwrap_or(DEFAULT_PRECISION), value));
            }
            'd' | 'i' if precision.is_none() => match next_arg(&mut args, conversion)? {
                Arg::Int(x) => ret.push_str(&x.to_string()),
                other => {
                    return Err(Error::argument(anyhow!(
                        "Cannot format {:?} with `%{}`",
                        other,
                        conversion
                    )))
                }
            },
            's' if precision.is_none() => match next_arg(&mut args, conversion)? {
                Arg::Str(x) => ret.push_str(x),
                other => {
                    return Err(Error::argument(anyhow!(
                        "Cannot format {:?} with `%s`",
                        other
                    )))
                }
            },
            _ => {
                return Err(Error::argument(anyhow!(
                    "Unsupported format specifier `%{}` in `{}`",
                    conversion,
                    template
                )))
            }
        }
    }
    if args.next().is_some() {
        return Err(Error::argument(anyhow!("Too many arguments for `{}`", template)));
    }
    Ok(ret)
}

/// Removes a single trailing line terminator, if present.
pub fn strip_terminator(cmd: &str) -> &str {
    cmd.strip_suffix("\r\n")
        .or_else(|| cmd.strip_suffix('\n'))
        .unwrap_or(cmd)
}

/// Returns the first numeric token of a reply, in fixed or scientific notation.
///
/// A leading header such as `:calc:mark1:y` echoed by the instrument is
/// skipped, digits inside it are not part of the value.
pub fn parse_scalar(response: &str) -> Result<f64, ParseError> {
    let body = response.trim_start();
    let body = match body.chars().next() {
        Some(c) if c == ':' || c == '*' || c.is_ascii_alphabetic() => body
            .split_once(char::is_whitespace)
            .map(|x| x.1)
            .unwrap_or(""),
        _ => body,
    };
    NUMBER
        .find(body)
        .and_then(|x| x.as_str().parse::<f64>().ok())
        .ok_or_else(|| ParseError::NoNumericValue(response.trim().to_string()))
}

/// Parses a comma separated list of values.
///
/// Either every field parses or the whole reply is rejected, so a caller never
/// sees a truncated list. A single trailing comma is tolerated.
pub fn parse_csv(response: &str) -> Result<Vec<f64>, ParseError> {
    let body = response.trim();
    let body = body.strip_suffix(',').unwrap_or(body).trim();
    if body.is_empty() {
        return Err(ParseError::EmptyTrace);
    }
    body.split(',')
        .map(str::trim)
        .enumerate()
        .map(|(index, field)| {
            // `nan` and `inf` are accepted by `f64::from_str` but are no sample values
            FIELD
                .is_match(field)
                .then(|| field.parse::<f64>().ok())
                .flatten()
                .ok_or_else(|| ParseError::InvalidTraceValue {
                    index,
                    value: field.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exponential_like_c() {
        assert_eq!(format_exponential(1e9, 9), "1.000000000e+09");
        assert_eq!(format_exponential(2.5e-3, 2), "2.50e-03");
        assert_eq!(format_exponential(-12.5, 3), "-1.250e+01");
        assert_eq!(format_exponential(0.0, 1), "0.0e+00");
        assert_eq!(format_exponential(1e120, 0), "1e+120");
    }

    #[test]
    fn format_center_frequency() {
        let cmd = format_command(":freq:cent %.9e", &[1.5e9.into()]).unwrap();
        assert_eq!(cmd, ":freq:cent 1.500000000e+09");
        let cmd = format_command(":freq:cent %.3E", &[1.5e9.into()]).unwrap();
        assert_eq!(cmd, ":freq:cent 1.500E+09");
    }

    #[test]
    fn format_bandwidth_as_integer_hz() {
        let cmd = format_command(":band:res %.0f", &[30000.4.into()]).unwrap();
        assert_eq!(cmd, ":band:res 30000");
        let cmd = format_command(":band:res %.0f", &[1e7.into()]).unwrap();
        assert_eq!(cmd, ":band:res 10000000");
    }

    #[test]
    fn format_misc_conversions() {
        let cmd = format_command("%s:%d %% %f", &["TRAC".into(), 3i64.into(), 0.5.into()]).unwrap();
        assert_eq!(cmd, "TRAC:3 % 0.500000");
        assert_eq!(format_command("*IDN?", &[]).unwrap(), "*IDN?");
        assert_eq!(format_command("%.2e", &[7u32.into()]).unwrap(), "7.00e+00");
    }

    #[test]
    fn format_rejects_mismatches() {
        assert!(matches!(format_command("%e", &[]), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            format_command("%e", &[1.0.into(), 2.0.into()]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(format_command("%d", &[1.0.into()]), Err(Error::InvalidArgument(_))));
        assert!(matches!(format_command("%s", &[1i64.into()]), Err(Error::InvalidArgument(_))));
        assert!(matches!(format_command("%x", &[1i64.into()]), Err(Error::InvalidArgument(_))));
        assert!(matches!(format_command("abc %", &[]), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            format_command("%e", &[f64::NAN.into()]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            format_command("%f", &[f64::INFINITY.into()]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn strip_single_terminator() {
        assert_eq!(strip_terminator(":freq:cent?\n"), ":freq:cent?");
        assert_eq!(strip_terminator(":freq:cent?\r\n"), ":freq:cent?");
        assert_eq!(strip_terminator(":freq:cent?\n\n"), ":freq:cent?\n");
        assert_eq!(strip_terminator(":freq:cent?"), ":freq:cent?");
    }

    #[test]
    fn scalar_replies() {
        assert_eq!(parse_scalar("-12.345E+01\n").unwrap(), -123.45);
        assert_eq!(parse_scalar("  +1.000000000E+09 \r\n").unwrap(), 1e9);
        assert_eq!(parse_scalar("3000000").unwrap(), 3e6);
        assert_eq!(parse_scalar("-85.2 dBm").unwrap(), -85.2);
        assert_eq!(parse_scalar(".5").unwrap(), 0.5);
    }

    #[test]
    fn scalar_after_echoed_header() {
        assert_eq!(parse_scalar(":calc:mark1:y -3.0").unwrap(), -3.0);
        assert_eq!(parse_scalar(":FREQ:CENT 1.5E+09\n").unwrap(), 1.5e9);
        assert_eq!(parse_scalar("MARK1 -42.5 dBm").unwrap(), -42.5);
        assert!(parse_scalar(":calc:mark1:y").is_err());
    }

    #[test]
    fn scalar_without_number() {
        assert_eq!(
            parse_scalar("ERROR\n"),
            Err(ParseError::NoNumericValue("ERROR".to_string()))
        );
        assert!(parse_scalar("").is_err());
    }

    #[test]
    fn csv_replies() {
        assert_eq!(parse_csv("1.0,2.0,3.0,4.0").unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(parse_csv(" -90.5, -1E+01 ,3\n").unwrap(), vec![-90.5, -10.0, 3.0]);
        assert_eq!(parse_csv("1,2,").unwrap(), vec![1.0, 2.0]);
        assert_eq!(parse_csv("-42").unwrap(), vec![-42.0]);
    }

    #[test]
    fn csv_rejects_partial_data() {
        assert_eq!(parse_csv(""), Err(ParseError::EmptyTrace));
        assert_eq!(parse_csv(" \n"), Err(ParseError::EmptyTrace));
        assert_eq!(parse_csv(","), Err(ParseError::EmptyTrace));
        assert_eq!(
            parse_csv("1.0,foo,3.0"),
            Err(ParseError::InvalidTraceValue {
                index: 1,
                value: "foo".to_string()
            })
        );
        assert!(parse_csv("1.0,,3.0").is_err());
        assert!(parse_csv("1.0,2.0,,").is_err());
    }

    #[test]
    fn csv_rejects_non_finite_values() {
        assert_eq!(
            parse_csv("nan,1.0"),
            Err(ParseError::InvalidTraceValue {
                index: 0,
                value: "nan".to_string()
            })
        );
        assert!(matches!(parse_csv("inf"), Err(ParseError::InvalidTraceValue { index: 0, .. })));
        assert!(matches!(parse_csv("1,-inf"), Err(ParseError::InvalidTraceValue { index: 1, .. })));
        assert!(parse_csv("1.0,infinity").is_err());
        assert!(parse_csv("1.0,0x10").is_err());
    }

    #[test]
    fn request_command() {
        assert_eq!(ScpiRequest::Write(":freq:span 1".to_string()).command(), ":freq:span 1");
        assert_eq!(ScpiRequest::QueryString("*IDN?".to_string()).command(), "*IDN?");
    }

    proptest! {
        #[test]
        fn scientific_round_trip(f in 1e-3f64..1e12) {
            let cmd = format_command(":freq:cent %.9e", &[f.into()]).unwrap();
            let parsed = parse_scalar(&cmd).unwrap();
            prop_assert!((parsed - f).abs() <= 1e-9 * f.abs());
        }
    }
}
