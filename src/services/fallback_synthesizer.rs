use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::{
    constants::stopwords::is_stopword,
    models::domain::{question::OPTION_COUNT, CanonicalQuestion, CanonicalTopic, Difficulty},
};

pub const GENERAL_KNOWLEDGE: &str = "General Knowledge";
pub const SYNTHETIC_QUESTION_COUNT: usize = 5;

const MAX_KEYWORDS: usize = 5;
const MIN_KEYWORD_CHARS: usize = 5;
const MAX_TITLE_WORDS: usize = 12;
const MAX_TITLE_CHARS: usize = 100;

struct QuestionTemplate {
    question: &'static str,
    correct: &'static str,
    distractors: [&'static str; 3],
    explanation: &'static str,
}

const TOPIC_TEMPLATES: [QuestionTemplate; SYNTHETIC_QUESTION_COUNT] = [
    QuestionTemplate {
        question: "Which statement best describes the role of {topic} in this material?",
        correct: "It is one of the central ideas the material covers",
        distractors: [
            "It is mentioned only as an unrelated aside",
            "It contradicts the rest of the material",
            "It is not covered by the material at all",
        ],
        explanation: "{topic} was identified as a key theme of the source material.",
    },
    QuestionTemplate {
        question: "What is a sensible first step when studying {topic}?",
        correct: "Review the key definitions and core ideas of {topic}",
        distractors: [
            "Skip the fundamentals and start with edge cases",
            "Memorise unrelated facts first",
            "Avoid practice questions until the very end",
        ],
        explanation: "Core definitions give the vocabulary needed for everything else in {topic}.",
    },
    QuestionTemplate {
        question: "Which habit best helps you retain what you learn about {topic}?",
        correct: "Practising active recall with questions about {topic}",
        distractors: [
            "Reading the material once and never revisiting it",
            "Highlighting every sentence of the material",
            "Studying only topics unrelated to {topic}",
        ],
        explanation: "Retrieval practice strengthens long-term memory of {topic}.",
    },
    QuestionTemplate {
        question: "How can you best check your understanding of {topic}?",
        correct: "Explain the main points of {topic} in your own words",
        distractors: [
            "Copy the material word for word",
            "Count how many pages you have read",
            "Assume understanding after a single reading",
        ],
        explanation: "Being able to restate {topic} without notes shows real understanding.",
    },
    QuestionTemplate {
        question: "Why is it useful to connect {topic} to related subjects?",
        correct: "Links between ideas make {topic} easier to understand and remember",
        distractors: [
            "It is never useful to relate ideas to each other",
            "Related subjects always make {topic} harder to learn",
            "Connections only matter for memorising dates",
        ],
        explanation: "Knowledge organised around connections is easier to recall and apply.",
    },
];

const GENERIC_TEMPLATES: [QuestionTemplate; SYNTHETIC_QUESTION_COUNT] = [
    QuestionTemplate {
        question: "What is the main purpose of a practice quiz?",
        correct: "To check understanding and find gaps in knowledge",
        distractors: [
            "To replace studying the material",
            "To memorise answers without understanding",
            "To finish as quickly as possible",
        ],
        explanation: "Quizzes are a feedback tool that shows what still needs work.",
    },
    QuestionTemplate {
        question: "Which study technique is most effective for long-term retention?",
        correct: "Spaced repetition over several sessions",
        distractors: [
            "Cramming everything the night before",
            "Rereading the same page many times in a row",
            "Studying with constant distractions",
        ],
        explanation: "Spacing reviews over time improves long-term retention.",
    },
    QuestionTemplate {
        question: "What should you do after answering a question incorrectly?",
        correct: "Review the explanation and revisit the related material",
        distractors: [
            "Ignore it and move on",
            "Memorise the letter of the correct option",
            "Stop studying the subject",
        ],
        explanation: "Mistakes point directly at the material that needs another look.",
    },
    QuestionTemplate {
        question: "Which of these is a good way to start learning a new subject?",
        correct: "Get an overview of its main ideas first",
        distractors: [
            "Begin with the most advanced details",
            "Avoid asking questions",
            "Skip any introductory material",
        ],
        explanation: "An overview gives a structure to attach later details to.",
    },
    QuestionTemplate {
        question: "How can you tell that you understand a concept well?",
        correct: "You can explain it clearly to someone else",
        distractors: [
            "You have read about it once",
            "You recognise its name",
            "You have highlighted it in your notes",
        ],
        explanation: "Teaching a concept requires organising it in your own words.",
    },
];

/// Topics derived from the document's title line and its most frequent
/// keywords. Never empty.
pub fn synthesize_topics(document: &str) -> Vec<CanonicalTopic> {
    let title = document_title(document);
    let title_words: HashSet<String> = title
        .iter()
        .flat_map(|t| t.split(|c: char| !c.is_alphabetic()))
        .map(str::to_lowercase)
        .collect();
    let keywords: Vec<String> = rank_keywords(document, usize::MAX)
        .into_iter()
        .filter(|k| !title_words.contains(k))
        .take(MAX_KEYWORDS)
        .collect();

    let mut topics = Vec::with_capacity(keywords.len() + 1);
    match title {
        Some(title) => {
            topics.push(CanonicalTopic::main(&title));
            topics.extend(keywords.iter().map(|k| CanonicalTopic::sub(&title_case(k), &title)));
        }
        None => topics.extend(keywords.iter().map(|k| CanonicalTopic::main(&title_case(k)))),
    }

    if topics.is_empty() {
        topics.push(CanonicalTopic::main(GENERAL_KNOWLEDGE));
    }
    topics
}

/// The first non-blank line, stripped of markdown decoration, when it reads
/// like a heading: short, and not a run of sentences.
pub fn document_title(document: &str) -> Option<String> {
    let line = document.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .trim_start_matches(|c: char| matches!(c, '#' | '*' | '-' | '=' | '>') || c.is_whitespace())
        .trim_end_matches(|c: char| matches!(c, '#' | '*' | ':' | '.') || c.is_whitespace());

    let words = line.split_whitespace().count();
    let is_sentence = [". ", "? ", "! "].iter().any(|stop| line.contains(stop));
    if words == 0 || words > MAX_TITLE_WORDS || is_sentence || !line.chars().any(char::is_alphabetic) {
        return None;
    }
    Some(line.chars().take(MAX_TITLE_CHARS).collect::<String>().trim_end().to_string())
}

/// Lowercased words of at least five letters, stopwords removed, ranked by
/// frequency and then by first appearance.
pub fn rank_keywords(document: &str, limit: usize) -> Vec<String> {
    let mut stats: HashMap<String, (usize, usize)> = HashMap::new();

    for (position, word) in document
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| w.chars().count() >= MIN_KEYWORD_CHARS)
        .map(str::to_lowercase)
        .filter(|w| !is_stopword(w))
        .enumerate()
    {
        stats.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = stats.into_iter().collect();
    ranked.sort_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
        count_b.cmp(count_a).then(first_a.cmp(first_b))
    });
    ranked.into_iter().take(limit).map(|(word, _)| word).collect()
}

/// Five schema-valid questions cycling over `topics`, or a generic set when no
/// usable topic name is given.
pub fn synthesize_questions(topics: &[String], difficulty: Difficulty) -> Vec<CanonicalQuestion> {
    let mut seen = HashSet::new();
    let topics: Vec<CanonicalTopic> = topics
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|t| CanonicalTopic::main(t))
        .filter(|t| seen.insert(t.normalized_key.clone()))
        .collect();

    (0..SYNTHETIC_QUESTION_COUNT)
        .map(|index| {
            let (template, topic) = match topics.get(index % topics.len().max(1)) {
                Some(topic) => (&TOPIC_TEMPLATES[index], topic.clone()),
                None => (&GENERIC_TEMPLATES[index], CanonicalTopic::main(GENERAL_KNOWLEDGE)),
            };
            build_question(template, &topic, index, difficulty)
        })
        .collect()
}

fn build_question(
    template: &QuestionTemplate,
    topic: &CanonicalTopic,
    index: usize,
    difficulty: Difficulty,
) -> CanonicalQuestion {
    let fill = |text: &str| text.replace("{topic}", &topic.display_name);
    let digest = Sha256::digest(format!("{}|{}", topic.normalized_key, index).as_bytes());

    let correct_answer = fill(template.correct);
    let mut options: Vec<String> = template.distractors.iter().map(|d| fill(d)).collect();
    options.insert(digest[0] as usize % OPTION_COUNT, correct_answer.clone());

    let hex: String = digest[..6].iter().map(|b| format!("{:02x}", b)).collect();
    let difficulty = match difficulty {
        Difficulty::Mixed => [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard][index % 3],
        other => other,
    };

    CanonicalQuestion {
        id: format!("synthetic-{}-{}", index + 1, hex),
        question_text: fill(template.question),
        options,
        correct_answer,
        explanation: fill(template.explanation),
        topic_name: topic.display_name.clone(),
        normalized_topic_key: topic.normalized_key.clone(),
        difficulty,
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
