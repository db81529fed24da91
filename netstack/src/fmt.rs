//! Fixed-buffer formatted-string builder (`spec.md` §4.12): a `printf`-
//! style subset (`%d %i %u %x %X %o %b %p %s %S %c %f %e %g %a`) with
//! width/precision/flags, truncating into a caller-supplied buffer with
//! a marker at the cut point rather than growing unbounded.
//!
//! This exists for parity with the original's diagnostic string builder
//! (used by the kernel's own logging before a `core::fmt` sink was
//! available); the rest of this crate uses `core::fmt`/`log` directly and
//! does not call into this module.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

pub const TRUNCATION_MARKER: &str = "...";

#[derive(Clone, Copy, Debug, Default)]
struct Spec {
    left_align: bool,
    zero_pad: bool,
    plus_sign: bool,
    width: usize,
    precision: Option<usize>,
}

/// One formatting argument. Strings are borrowed for `%s`; `%S` takes a
/// UTF-16 code-unit slice as the original's wide-string variant did.
pub enum Arg<'a> {
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(&'a str),
    WideStr(&'a [u16]),
    Char(char),
    Ptr(usize),
}

/// Render `format` against `args` into a buffer at most `cap` bytes,
/// appending [`TRUNCATION_MARKER`] in place of the final bytes if the
/// rendered output would exceed `cap`.
pub fn format(format_str: &str, args: &[Arg], cap: usize) -> String {
    let mut out = String::new();
    let mut arg_iter = args.iter();
    let mut chars = format_str.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = Spec::default();
        loop {
            match chars.peek() {
                Some('-') => {
                    spec.left_align = true;
                    chars.next();
                }
                Some('0') => {
                    spec.zero_pad = true;
                    chars.next();
                }
                Some('+') => {
                    spec.plus_sign = true;
                    chars.next();
                }
                _ => break,
            }
        }
        let mut width_digits = String::new();
        while matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
            width_digits.push(chars.next().unwrap());
        }
        spec.width = width_digits.parse().unwrap_or(0);
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut prec_digits = String::new();
            while matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
                prec_digits.push(chars.next().unwrap());
            }
            spec.precision = Some(prec_digits.parse().unwrap_or(0));
        }

        let conv = match chars.next() {
            Some(c) => c,
            None => break,
        };
        let rendered = render_one(conv, &spec, arg_iter.next());
        out.push_str(&pad(&rendered, &spec));
        if out.len() > cap {
            break;
        }
    }

    truncate_with_marker(out, cap)
}

fn pad(body: &str, spec: &Spec) -> String {
    if body.len() >= spec.width {
        return String::from(body);
    }
    let fill = spec.width - body.len();
    let pad_char = if spec.zero_pad && !spec.left_align { '0' } else { ' ' };
    let mut out = String::with_capacity(spec.width);
    if spec.left_align {
        out.push_str(body);
        out.extend(core::iter::repeat(' ').take(fill));
    } else {
        out.extend(core::iter::repeat(pad_char).take(fill));
        out.push_str(body);
    }
    out
}

fn render_one(conv: char, spec: &Spec, arg: Option<&Arg>) -> String {
    match (conv, arg) {
        ('%', _) => String::from("%"),
        ('d', Some(Arg::Int(v))) | ('i', Some(Arg::Int(v))) => {
            if spec.plus_sign && *v >= 0 {
                alloc::format!("+{v}")
            } else {
                alloc::format!("{v}")
            }
        }
        ('u', Some(Arg::UInt(v))) => alloc::format!("{v}"),
        ('x', Some(Arg::UInt(v))) => alloc::format!("{v:x}"),
        ('X', Some(Arg::UInt(v))) => alloc::format!("{v:X}"),
        ('o', Some(Arg::UInt(v))) => alloc::format!("{v:o}"),
        ('b', Some(Arg::UInt(v))) => alloc::format!("{v:b}"),
        ('p', Some(Arg::Ptr(v))) => alloc::format!("0x{v:x}"),
        ('s', Some(Arg::Str(v))) => match spec.precision {
            Some(p) => String::from(&v[..p.min(v.len())]),
            None => String::from(*v),
        },
        ('S', Some(Arg::WideStr(v))) => String::from_utf16_lossy(v),
        ('c', Some(Arg::Char(v))) => alloc::format!("{v}"),
        ('f', Some(Arg::Float(v))) => match spec.precision {
            Some(p) => alloc::format!("{v:.p$}"),
            None => alloc::format!("{v:.6}"),
        },
        ('e', Some(Arg::Float(v))) => alloc::format!("{v:e}"),
        ('g', Some(Arg::Float(v))) => {
            let s = alloc::format!("{v}");
            s
        }
        ('a', Some(Arg::Float(v))) => alloc::format!("{:x}", v.to_bits()),
        _ => String::from("?"),
    }
}

fn truncate_with_marker(mut s: String, cap: usize) -> String {
    if s.len() <= cap {
        return s;
    }
    let keep = cap.saturating_sub(TRUNCATION_MARKER.len());
    let mut boundary = keep.min(s.len());
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    s.truncate(boundary);
    s.push_str(TRUNCATION_MARKER);
    s
}

/// Convenience: format directly to a byte vector capped at `cap`.
pub fn format_bytes(format_str: &str, args: &[Arg], cap: usize) -> Vec<u8> {
    format(format_str, args, cap).into_bytes()
}
