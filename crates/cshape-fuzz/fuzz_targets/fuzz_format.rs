#![no_main]
use cshape_core::{FormatFamily, FormatString, Piece, parse_format};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let Ok(text) = std::str::from_utf8(rest) else {
        return;
    };
    let family = if selector & 1 == 0 {
        FormatFamily::Print
    } else {
        FormatFamily::Scan
    };

    let fmt = FormatString::new(text, family);
    let directives = parse_format(text, family);
    let required = fmt.required_args();
    let pieces = fmt.pieces();

    match directives {
        Ok(directives) => {
            assert_eq!(required.ok(), Some(directives.len()));
            let pieces = pieces.expect("pieces must parse when directives do");
            // Every directive shows up once, either as a star argument or as
            // the conversion itself, and the pieces tile the whole text.
            let mut consumed = 0;
            let mut rebuilt = String::with_capacity(text.len());
            for piece in &pieces {
                match piece {
                    Piece::Literal(run) => rebuilt.push_str(run),
                    Piece::Conversion { spec, star_args, .. } => {
                        consumed += star_args + 1;
                        rebuilt.push_str(spec);
                    }
                }
            }
            assert_eq!(rebuilt, text);
            assert_eq!(consumed, directives.len());
        }
        Err(err) => {
            assert_eq!(required.err(), Some(err.clone()));
            assert!(pieces.is_err());
        }
    }
});
