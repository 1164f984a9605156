use crate::errors::ServiceError;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};

static NON_SLUG_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug pattern"));

/// Lowercase, dash-separated ASCII form of `text`. Non-Latin scripts are
/// transliterated first. Falls back to `"item"` when nothing slug-worthy remains.
pub fn slugify(text: &str) -> String {
    let lowered = deunicode::deunicode(text).to_lowercase();
    let slug = NON_SLUG_CHARS.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "item".to_string()
    } else {
        slug.to_string()
    }
}

/// Returns `base`, or `base-N` with the smallest `N` not already present in `column`.
pub async fn unique_slug<E, C>(
    db: &C,
    column: E::Column,
    base: &str,
) -> Result<String, ServiceError>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    let mut candidate = base.to_string();
    let mut counter = 1u32;

    while E::find()
        .filter(column.eq(candidate.clone()))
        .one(db)
        .await?
        .is_some()
    {
        candidate = format!("{}-{}", base, counter);
        counter += 1;
    }

    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Summer  Shoes!"), "summer-shoes");
        assert_eq!(slugify("  --Mixed_Case 42-- "), "mixed-case-42");
        assert_eq!(slugify("???"), "item");
    }

    #[test]
    fn slugify_transliterates_cyrillic() {
        assert_eq!(slugify("Кроссовки Nike"), "krossovki-nike");
        assert_eq!(slugify("Café Crème"), "cafe-creme");
    }
}
