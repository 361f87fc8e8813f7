/// What the provider is told to reply when a document has nothing to extract.
pub const NO_RESULTS_MARKER: &str = "NO_RESULTS";

pub const JSON_SYSTEM_INSTRUCTION: &str = "You are a precise assistant for building study material. \
Reply with a single JSON value and nothing else: no markdown fences, no commentary before or after the JSON.";

pub const DETECT_TOPICS_TEMPLATE_NAME: &str = "detect_topics";
pub const NEW_TOPICS_TEMPLATE_NAME: &str = "new_topics";
pub const GENERATE_QUESTIONS_TEMPLATE_NAME: &str = "generate_questions";

pub const DETECT_TOPICS_PROMPT: &str = "Analyse the document below and identify the topics a learner should study.

## OUTPUT FORMAT

Return a JSON object of this exact shape:
{\"topics\": [{\"mainTopic\": \"<main topic>\", \"subTopics\": [\"<sub-topic>\", \"<sub-topic>\"]}]}

## RULES

1. Use between 1 and 8 main topics, each with up to 6 sub-topics.
2. Topic names are short noun phrases (at most 6 words) in the document's language.
3. Do not invent topics that the document does not cover.
4. If the document has no teachable content, reply with exactly {{NO_RESULTS}}.
{{#EXISTING_TOPICS}}
5. The course already has these topics. Reuse their exact spelling when the document covers them:
{{EXISTING_TOPICS}}
{{/EXISTING_TOPICS}}

## DOCUMENT

{{DOCUMENT}}";

pub const NEW_TOPICS_PROMPT: &str = "Identify topics in the material below that are NOT already covered by the existing topic list.

## OUTPUT FORMAT

Return a JSON object of this exact shape:
{\"newTopics\": [\"<topic name>\", \"<topic name>\"]}

## RULES

1. Only list topics that are genuinely new; spelling variants of existing topics are not new.
2. Topic names are short noun phrases (at most 6 words).
3. If nothing new is covered, reply with exactly {{NO_RESULTS}}.

## EXISTING TOPICS

{{#EXISTING_TOPICS}}{{EXISTING_TOPICS}}{{/EXISTING_TOPICS}}

## MATERIAL

{{CONTEXT}}";

pub const GENERATE_QUESTIONS_PROMPT: &str = "Write {{COUNT}} multiple-choice quiz questions at {{DIFFICULTY}} difficulty.

{{#TOPICS}}Cover these topics, spreading the questions evenly across them:
{{TOPICS}}
{{/TOPICS}}
## OUTPUT FORMAT

Return a JSON object of the form {\"questions\": [...]} matching this JSON schema:
{{SCHEMA}}

## RULES

1. Every question has exactly 4 options.
2. correctAnswer repeats the text of the correct option exactly.
3. explanation states in one or two sentences why the answer is correct.
4. topicName is the topic the question belongs to, spelled as given above.
5. difficulty is one of easy, medium, hard.";
