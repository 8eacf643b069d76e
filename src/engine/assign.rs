use ulid::Ulid;

use crate::model::Span;
use crate::suite::SuiteMatcher;

use super::book::{Book, ResourceFilter};
use super::conflict::{detect_conflicts, ConflictQuery};

/// Pick a free resource for `matcher`'s suite type over `span`.
///
/// Candidates are tried in creation order, so identical data always yields
/// the same answer. `None` means nothing qualifies or everything is taken.
pub(crate) fn auto_assign(
    book: &Book,
    matcher: SuiteMatcher,
    span: Span,
    pet_id: Option<Ulid>,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    book.find_resources(&ResourceFilter::matching(matcher))
        .into_iter()
        .map(|r| r.id)
        .find(|&rid| {
            let query = ConflictQuery::new(span)
                .resource(Some(rid))
                .pet(pet_id)
                .excluding(exclude);
            !detect_conflicts(book, &query).has_conflict()
        })
}

/// Every free resource for `matcher`'s suite type, in creation order.
pub(crate) fn free_resources(
    book: &Book,
    matcher: SuiteMatcher,
    span: Span,
    exclude: Option<Ulid>,
) -> Vec<Ulid> {
    book.find_resources(&ResourceFilter::matching(matcher))
        .into_iter()
        .map(|r| r.id)
        .filter(|&rid| {
            let query = ConflictQuery::new(span).resource(Some(rid)).excluding(exclude);
            !detect_conflicts(book, &query).has_conflict()
        })
        .collect()
}
