use crate::model::Publication;
use crate::semantic::publication_embedding_text;

/// Rough token estimate for budget checks: one token per four characters,
/// rounded up. Only used to keep summarization prompts bounded, so the
/// estimate erring on either side is harmless as long as it is stable.
pub(super) fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub(super) fn publication_block(publications: &[Publication]) -> String {
    publications
        .iter()
        .map(publication_embedding_text)
        .collect::<Vec<String>>()
        .join("\n\n")
}

/// Trims a publication list until its formatted block fits the token budget.
/// Oldest (first) publications are dropped first, down to a single
/// publication; after that, abstracts are shortened by removing trailing
/// sentences, then trailing words. Deterministic for a given input order and
/// budget.
pub(super) fn fit_publications_to_budget(
    publications: &[Publication],
    token_budget: usize,
) -> Vec<Publication> {
    let mut publications = publications.to_vec();

    while publications.len() > 1
        && estimate_tokens(&publication_block(&publications)) > token_budget
    {
        publications.remove(0);
    }

    while estimate_tokens(&publication_block(&publications)) > token_budget {
        let Some(target) = longest_abstract_index(&publications) else {
            break;
        };
        let Some(shortened) = shorten_abstract(&publications[target].abstract_text) else {
            break;
        };
        publications[target].abstract_text = shortened;
    }

    publications
}

fn longest_abstract_index(publications: &[Publication]) -> Option<usize> {
    publications
        .iter()
        .enumerate()
        .filter(|(_, publication)| !publication.abstract_text.trim().is_empty())
        .max_by_key(|(_, publication)| publication.abstract_text.chars().count())
        .map(|(index, _)| index)
}

fn shorten_abstract(text: &str) -> Option<String> {
    drop_trailing_sentence(text).or_else(|| drop_trailing_word(text))
}

fn drop_trailing_sentence(text: &str) -> Option<String> {
    let trimmed = text.trim_end();
    let mut boundaries: Vec<usize> = trimmed
        .char_indices()
        .filter(|(_, character)| matches!(character, '.' | '!' | '?'))
        .map(|(index, _)| index)
        .collect();

    // A terminator that ends the text closes the final sentence; the cut
    // point is the boundary before it.
    if let Some(&last) = boundaries.last() {
        if last + 1 == trimmed.len() {
            boundaries.pop();
        }
    }

    let cut = *boundaries.last()?;
    let shortened = trimmed[..=cut].trim_end();
    if shortened.is_empty() || shortened.len() == trimmed.len() {
        return None;
    }
    Some(shortened.to_string())
}

fn drop_trailing_word(text: &str) -> Option<String> {
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        return None;
    }

    match trimmed.rfind(char::is_whitespace) {
        Some(cut) => Some(trimmed[..cut].trim_end().to_string()),
        None => Some(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::{estimate_tokens, fit_publications_to_budget, publication_block};
    use crate::model::Publication;

    fn publication(title: &str, abstract_text: &str) -> Publication {
        Publication {
            title: title.to_string(),
            abstract_text: abstract_text.to_string(),
            source_url: None,
        }
    }

    #[test]
    fn untruncated_when_within_budget() {
        let publications = vec![publication("A", "short."), publication("B", "also short.")];
        let fitted = fit_publications_to_budget(&publications, 1000);
        assert_eq!(fitted.len(), 2);
        assert_eq!(fitted[0].abstract_text, "short.");
    }

    #[test]
    fn drops_oldest_publications_first() {
        let publications = vec![
            publication("Oldest", &"x".repeat(400)),
            publication("Middle", &"y".repeat(400)),
            publication("Newest", &"z".repeat(400)),
        ];

        let fitted = fit_publications_to_budget(&publications, 120);
        assert_eq!(fitted.len(), 1);
        assert_eq!(fitted[0].title, "Newest");
    }

    #[test]
    fn shortens_last_remaining_abstract_instead_of_dropping_it() {
        let long_abstract =
            "First sentence about methods. Second sentence about data. Third sentence about results.";
        let publications = vec![publication("Only", long_abstract)];

        let fitted = fit_publications_to_budget(&publications, 12);
        assert_eq!(fitted.len(), 1);
        assert!(fitted[0].abstract_text.chars().count() < long_abstract.chars().count());
        assert!(estimate_tokens(&publication_block(&fitted)) <= 12 || fitted[0].abstract_text.is_empty());
    }

    #[test]
    fn truncation_is_deterministic() {
        let publications = vec![
            publication("A", "One. Two. Three. Four."),
            publication("B", "Alpha beta gamma delta epsilon zeta."),
        ];

        let first = fit_publications_to_budget(&publications, 10);
        let second = fit_publications_to_budget(&publications, 10);
        assert_eq!(
            first.iter().map(|p| p.abstract_text.clone()).collect::<Vec<_>>(),
            second.iter().map(|p| p.abstract_text.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn word_removal_takes_over_when_no_sentence_boundary_remains() {
        let publications = vec![publication("Only", "word1 word2 word3 word4 word5 word6")];
        let fitted = fit_publications_to_budget(&publications, 8);
        assert!(fitted[0].abstract_text.chars().count() < "word1 word2 word3 word4 word5 word6".len());
    }
}
