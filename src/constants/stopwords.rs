/// Words of five or more letters that carry no topical meaning. Keyword
/// extraction already ignores anything shorter.
pub const STOPWORDS: &[&str] = &[
    "about", "above", "across", "after", "again", "against", "along", "already", "although",
    "always", "among", "another", "anyone", "anything", "around", "because", "become", "becomes",
    "before", "began", "behind", "being", "below", "beside", "besides", "between", "beyond",
    "cannot", "certain", "chapter", "could", "different", "during", "either", "enough",
    "especially", "every", "everyone", "everything", "example", "examples", "first", "following",
    "found", "further", "general", "given", "going", "great", "having", "hence", "however",
    "important", "include", "included", "includes", "including", "indeed", "instead", "itself",
    "known", "large", "later", "least", "little", "makes", "making", "might", "mostly", "never",
    "nothing", "often", "other", "others", "otherwise", "overall", "perhaps", "place", "quite",
    "rather", "really", "section", "seems", "several", "shall", "should", "similar", "since",
    "small", "something", "sometimes", "still", "their", "theirs", "themselves", "there",
    "therefore", "these", "thing", "things", "think", "third", "those", "though", "three",
    "through", "throughout", "today", "together", "toward", "towards", "under", "unless", "until",
    "using", "usually", "various", "whatever", "where", "whereas", "whether", "which", "while",
    "whole", "whose", "within", "without", "would", "years", "yours", "yourself",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}
