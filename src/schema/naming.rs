//! Name derivation rules
//!
//! Internal column names are document keys, so derivation must be pure
//! and idempotent: `normalize_name(normalize_name(x)) == normalize_name(x)`.

/// Fold a Latin character with diacritics to its ASCII base letter(s)
fn fold_char(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ă' | 'ā' | 'ą' => "a",
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ă' | 'Ā' | 'Ą' => "A",
        'æ' => "ae",
        'Æ' => "AE",
        'ç' | 'ć' | 'č' | 'ĉ' => "c",
        'Ç' | 'Ć' | 'Č' | 'Ĉ' => "C",
        'ď' | 'đ' => "d",
        'Ď' | 'Đ' => "D",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ę' | 'ě' => "e",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ę' | 'Ě' => "E",
        'ğ' => "g",
        'Ğ' => "G",
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'ı' => "i",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' | 'İ' => "I",
        'ł' => "l",
        'Ł' => "L",
        'ñ' | 'ń' | 'ň' => "n",
        'Ñ' | 'Ń' | 'Ň' => "N",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => "o",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ő' => "O",
        'œ' => "oe",
        'Œ' => "OE",
        'ř' => "r",
        'Ř' => "R",
        'ś' | 'š' | 'ş' | 'ș' => "s",
        'Ś' | 'Š' | 'Ş' | 'Ș' => "S",
        'ß' => "ss",
        'ť' | 'ţ' | 'ț' => "t",
        'Ť' | 'Ţ' | 'Ț' => "T",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => "u",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ū' | 'Ů' | 'Ű' => "U",
        'ý' | 'ÿ' => "y",
        'Ý' | 'Ÿ' => "Y",
        'ź' | 'ż' | 'ž' => "z",
        'Ź' | 'Ż' | 'Ž' => "Z",
        _ => return None,
    };
    Some(folded)
}

/// Lowercase ASCII words of `input`, joined by `separator`
fn words(input: &str, separator: char) -> String {
    let mut result = String::with_capacity(input.len());
    let mut pending_separator = false;

    let push = |c: char, result: &mut String, pending: &mut bool| {
        if *pending && !result.is_empty() {
            result.push(separator);
        }
        *pending = false;
        result.push(c.to_ascii_lowercase());
    };

    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            push(c, &mut result, &mut pending_separator);
        } else if let Some(folded) = fold_char(c) {
            for f in folded.chars() {
                push(f, &mut result, &mut pending_separator);
            }
        } else if c == '\'' || c == '’' {
            // apostrophes join the surrounding word
        } else {
            pending_separator = true;
        }
    }

    result
}

/// Derive the internal (document key) name of a column from its label
///
/// `"Data Nașterii"` becomes `"data_nasterii"`, `"E-mail address"`
/// becomes `"e_mail_address"`. Returns an empty string when the label
/// has no letters or digits.
pub fn normalize_name(display_name: &str) -> String {
    words(display_name, '_')
}

/// Derive a URL-safe slug: `"Vânzări 2020"` becomes `"vanzari-2020"`
pub fn slugify(name: &str) -> String {
    let mut slug = words(name, '-');
    if slug.len() > 50 {
        slug.truncate(50);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    slug
}

/// First slug derived from `base` that `taken` does not reject
pub fn unique_slug(base: &str, taken: impl Fn(&str) -> bool) -> String {
    let base = if base.is_empty() { "table".to_string() } else { base.to_string() };
    if !taken(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Full Name"), "full_name");
        assert_eq!(normalize_name("  Data Nașterii "), "data_nasterii");
        assert_eq!(normalize_name("E-mail address"), "e_mail_address");
        assert_eq!(normalize_name("Țară / Județ"), "tara_judet");
        assert_eq!(normalize_name("O'Brien"), "obrien");
        assert_eq!(normalize_name("Straße 2"), "strasse_2");
        assert_eq!(normalize_name("***"), "");
    }

    #[test]
    fn test_normalize_name_is_idempotent() {
        for input in ["Full Name", "Ăla Bala!!", "__x__y__", "Total (RON)", "a1 B2"] {
            let once = normalize_name(input);
            assert_eq!(normalize_name(&once), once, "{}", input);
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Vânzări 2020"), "vanzari-2020");
        assert_eq!(slugify("Clients & Orders"), "clients-orders");
        let long = "word ".repeat(20);
        assert!(slugify(&long).len() <= 50);
        assert!(!slugify(&long).ends_with('-'));
    }

    #[test]
    fn test_unique_slug() {
        let taken = ["sales", "sales-2"];
        assert_eq!(unique_slug("sales", |s| taken.contains(&s)), "sales-3");
        assert_eq!(unique_slug("orders", |s| taken.contains(&s)), "orders");
    }
}
