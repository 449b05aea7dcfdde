// SPDX-License-Identifier: Apache-2.0
//
// Copyright (C) 2024, ARM Limited and contributors.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may
// not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Decoded variadic values and their textual rendering.

use core::fmt;

use crate::print::{PrintError, PrintSpecifier};

/// A value decoded from the variadic-argument region.
///
/// Produced transiently, one per conversion specifier, and never persisted.
/// Guest pointers are represented as [Value::U32].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    /// Borrowed from the linear memory buffer the value was decoded from.
    Str(&'a str),
}

/// Render a decoded value according to its conversion specifier.
///
/// Pure and locale-independent. The conversion kinds are matched
/// exhaustively; a (conversion, value) combination the layout table never
/// produces fails fast instead of rendering garbage, so any drift between
/// the table and this renderer surfaces immediately.
pub fn render<W>(spec: PrintSpecifier, value: &Value<'_>, out: &mut W) -> Result<(), PrintError>
where
    W: fmt::Write + ?Sized,
{
    match spec {
        PrintSpecifier::Dec => match value {
            Value::I32(x) => write!(out, "{x}")?,
            Value::I64(x) => write!(out, "{x}")?,
            val => return Err(PrintError::NotAnInteger(format!("{val:?}"))),
        },
        PrintSpecifier::Unsigned => match value {
            Value::U32(x) => write!(out, "{x}")?,
            Value::U64(x) => write!(out, "{x}")?,
            val => return Err(PrintError::NotAnInteger(format!("{val:?}"))),
        },
        // No "0x" prefix: hex conversions render bare digits.
        PrintSpecifier::Hex => match value {
            Value::U32(x) => write!(out, "{x:x}")?,
            Value::U64(x) => write!(out, "{x:x}")?,
            val => return Err(PrintError::NotAnInteger(format!("{val:?}"))),
        },
        PrintSpecifier::UpperHex => match value {
            Value::U32(x) => write!(out, "{x:X}")?,
            Value::U64(x) => write!(out, "{x:X}")?,
            val => return Err(PrintError::NotAnInteger(format!("{val:?}"))),
        },
        PrintSpecifier::Oct => match value {
            Value::U32(x) => write!(out, "{x:o}")?,
            Value::U64(x) => write!(out, "{x:o}")?,
            val => return Err(PrintError::NotAnInteger(format!("{val:?}"))),
        },
        // Known deviation from the usual libc printf: no "0x" prefix on
        // addresses either.
        PrintSpecifier::Ptr => match value {
            Value::U32(x) => write!(out, "{x:x}")?,
            val => return Err(PrintError::NotAnInteger(format!("{val:?}"))),
        },
        PrintSpecifier::Char => match value {
            // The argument was promoted to int; only the low 8 bits name the
            // character.
            Value::I32(x) => out.write_char(char::from(*x as u8))?,
            val => return Err(PrintError::NotAnInteger(format!("{val:?}"))),
        },
        PrintSpecifier::Str => match value {
            Value::Str(s) => out.write_str(s)?,
            val => return Err(PrintError::NotAString(format!("{val:?}"))),
        },
        PrintSpecifier::Fixed | PrintSpecifier::Shortest => match value {
            // f64 Display is the shortest decimal expansion that round-trips
            // and never switches to exponent notation, which satisfies both
            // the fixed-notation and the shortest-representation contracts.
            Value::F64(x) => write!(out, "{x}")?,
            val => return Err(PrintError::NotAFloat(format!("{val:?}"))),
        },
        PrintSpecifier::UpperFixed | PrintSpecifier::UpperShortest => match value {
            Value::F64(x) => out.write_str(&format!("{x}").to_uppercase())?,
            val => return Err(PrintError::NotAFloat(format!("{val:?}"))),
        },
        PrintSpecifier::Sci => match value {
            Value::F64(x) => out.write_str(&sci(*x))?,
            val => return Err(PrintError::NotAFloat(format!("{val:?}"))),
        },
        PrintSpecifier::UpperSci => match value {
            Value::F64(x) => out.write_str(&sci(*x).to_uppercase())?,
            val => return Err(PrintError::NotAFloat(format!("{val:?}"))),
        },
        PrintSpecifier::HexFloat => match value {
            Value::F64(x) => out.write_str(&hex_float(*x))?,
            val => return Err(PrintError::NotAFloat(format!("{val:?}"))),
        },
        PrintSpecifier::UpperHexFloat => match value {
            Value::F64(x) => out.write_str(&hex_float(*x).to_uppercase())?,
            val => return Err(PrintError::NotAFloat(format!("{val:?}"))),
        },
    }
    Ok(())
}

/// Exponential notation with a 2-digit mantissa precision and an explicit
/// exponent sign, e.g. `2.86e+9`.
fn sci(x: f64) -> String {
    let s = format!("{x:.2e}");
    match s.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
        // Negative exponent, or a special value with no exponent at all.
        _ => s,
    }
}

/// Approximate positional hexadecimal expansion of a double: hex integer
/// part, then up to 13 hex fraction digits. This deliberately does not
/// produce the exact `0x1.8p+1` hexadecimal floating-point notation.
fn hex_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".into();
    }
    if x.is_infinite() {
        return if x < 0.0 { "-inf".into() } else { "inf".into() };
    }

    let mut out = String::new();
    if x.is_sign_negative() && x != 0.0 {
        out.push('-');
    }

    let mut int_part = x.abs().trunc();
    if int_part < 1.0 {
        out.push('0');
    } else {
        let mut digits = Vec::new();
        while int_part >= 1.0 {
            digits.push(char::from_digit((int_part % 16.0) as u32, 16).unwrap());
            int_part = (int_part / 16.0).trunc();
        }
        out.extend(digits.iter().rev());
    }

    let mut frac = x.abs().fract();
    if frac != 0.0 {
        out.push('.');
        // An f64 mantissa spans 13 hex digits at most.
        for _ in 0..13 {
            frac *= 16.0;
            out.push(char::from_digit(frac.trunc() as u32, 16).unwrap());
            frac = frac.fract();
            if frac == 0.0 {
                break;
            }
        }
    }
    out
}
