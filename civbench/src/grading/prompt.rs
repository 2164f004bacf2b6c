//! Grading prompt construction

use crate::assignments::Assignment;

const GRADING_TEMPLATE: &str = r#"You are grading a civil engineering student's answer.

QUESTION: See the attached image(s)

GROUND TRUTH ANSWER:
{ground_truth}

SUB-QUESTIONS TO GRADE:
{labels}

STUDENT'S ANSWER:
{student_answer}

Your task: Compare the student's answer to the ground truth and evaluate each sub-question listed above.
If they get a HSS very similar to the correct one, give them correct.

For each question, mark as:
- "correct": Answer matches ground truth (accepts minor notation differences)
- "partial": Right approach/method but has calculation errors or minor mistakes
- "incorrect": Wrong answer or no relevant attempt

Grade every listed sub-question, even when the student did not answer it (mark it "incorrect").

IMPORTANT: Respond with ONLY valid JSON. No other text before or after.

Required format:
{
    "questions": {
        "question_id": "correct|partial|incorrect",
        ...
    },
    "total_correct": <number>,
    "total_questions": <number>,
    "score": <0-100 based on (correct + 0.5*partial)/total>
}

Example:
{
    "questions": {
        "1a": "correct",
        "1b": "incorrect",
        "2": "partial"
    },
    "total_correct": 1,
    "total_questions": 3,
    "score": 50
}
"#;

/// Build the grading prompt for one candidate answer
pub fn build_grading_prompt(assignment: &Assignment, student_answer: &str) -> String {
    let labels = assignment.labels().join(", ");
    fill_template(
        GRADING_TEMPLATE,
        &[
            ("{ground_truth}", assignment.ground_truth.trim()),
            ("{labels}", labels.as_str()),
            ("{student_answer}", student_answer.trim()),
        ],
    )
}

/// Substitute placeholders in one pass; inserted text is never rescanned
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + values.iter().map(|(_, v)| v.len()).sum::<usize>());
    let mut rest = template;

    while let Some((at, key, value)) = values
        .iter()
        .filter_map(|&(key, value)| rest.find(key).map(|at| (at, key, value)))
        .min_by_key(|&(at, _, _)| at)
    {
        out.push_str(&rest[..at]);
        out.push_str(value);
        rest = &rest[at + key.len()..];
    }
    out.push_str(rest);
    out
}
