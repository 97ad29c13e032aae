// tests/common/mod.rs

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedReceiver;

use quizforge::{
    config::{Config, LlmConfig},
    error::AppError,
    llm::{ChatMessage, CompletionProvider, LlmError},
    models::{
        answer::{Answer, AnswerGrade},
        event::StreamEvent,
        question::{NewQuestion, Question},
        quiz_attempt::{AttemptStatus, NewAttempt, QuizAttempt},
        session::SessionOwner,
    },
    repository::{AnswerWrite, AttemptRepository, MaterialProvider, SessionProvider, SweepReport},
    state::AppState,
};

pub const OWNER: i64 = 7;
pub const STRANGER: i64 = 99;
pub const SESSION: i64 = 1;

#[derive(Default)]
struct StoreData {
    next_id: i64,
    sessions: HashMap<i64, SessionOwner>,
    materials: HashMap<i64, Vec<String>>,
    attempts: BTreeMap<i64, QuizAttempt>,
    /// Last status change per attempt.
    status_changed: HashMap<i64, DateTime<Utc>>,
    questions: Vec<Question>,
    answers: Vec<Answer>,
}

impl StoreData {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn set_status(&mut self, attempt_id: i64, status: AttemptStatus) {
        if let Some(attempt) = self.attempts.get_mut(&attempt_id) {
            attempt.status = status;
            self.status_changed.insert(attempt_id, Utc::now());
        }
    }
}

/// In-memory stand-in for `PgStore`, with knobs for injecting write failures.
#[derive(Default)]
pub struct InMemoryStore {
    data: Mutex<StoreData>,
    /// Question number whose insert fails.
    fail_question_insert: Mutex<Option<i32>>,
    /// Answer ids whose grade write fails.
    fail_grade_writes: Mutex<Vec<i64>>,
    /// Called with the question number right after a question row is stored.
    on_question_insert: Mutex<Option<Box<dyn Fn(i32) + Send + Sync>>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Session owned by `OWNER`.
    pub fn with_session() -> Arc<Self> {
        let store = Self::new();
        store.add_session(SESSION, OWNER, "Rust ownership");
        store
    }

    pub fn add_session(&self, id: i64, owner_id: i64, subject: &str) {
        self.data.lock().unwrap().sessions.insert(
            id,
            SessionOwner {
                owner_id,
                subject: subject.to_string(),
                goal: Some("Pass the systems exam".to_string()),
            },
        );
    }

    pub fn add_material(&self, session_id: i64, text: &str) {
        self.data
            .lock()
            .unwrap()
            .materials
            .entry(session_id)
            .or_default()
            .push(text.to_string());
    }

    pub fn fail_question_insert_at(&self, question_number: i32) {
        *self.fail_question_insert.lock().unwrap() = Some(question_number);
    }

    pub fn fail_grade_write(&self, answer_id: i64) {
        self.fail_grade_writes.lock().unwrap().push(answer_id);
    }

    pub fn on_question_insert(&self, hook: impl Fn(i32) + Send + Sync + 'static) {
        *self.on_question_insert.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn clear_failures(&self) {
        *self.fail_question_insert.lock().unwrap() = None;
        self.fail_grade_writes.lock().unwrap().clear();
    }

    pub fn attempts(&self) -> Vec<QuizAttempt> {
        self.data.lock().unwrap().attempts.values().cloned().collect()
    }

    pub fn attempt(&self, id: i64) -> QuizAttempt {
        self.data.lock().unwrap().attempts[&id].clone()
    }

    pub fn questions_of(&self, attempt_id: i64) -> Vec<Question> {
        let mut questions: Vec<Question> = self
            .data
            .lock()
            .unwrap()
            .questions
            .iter()
            .filter(|q| q.attempt_id == attempt_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| q.question_number);
        questions
    }

    pub fn answers_of(&self, attempt_id: i64) -> Vec<Answer> {
        let data = self.data.lock().unwrap();
        let mut answers: Vec<Answer> = data
            .answers
            .iter()
            .filter(|a| a.attempt_id == attempt_id)
            .cloned()
            .collect();
        answers.sort_by_key(|a| {
            data.questions
                .iter()
                .find(|q| q.id == a.question_id)
                .map(|q| q.question_number)
        });
        answers
    }

    pub fn set_created_at(&self, attempt_id: i64, created_at: DateTime<Utc>) {
        if let Some(attempt) = self.data.lock().unwrap().attempts.get_mut(&attempt_id) {
            attempt.created_at = created_at;
        }
    }

    pub fn force_status(&self, attempt_id: i64, status: AttemptStatus) {
        self.data.lock().unwrap().set_status(attempt_id, status);
    }

    pub fn set_status_changed_at(&self, attempt_id: i64, changed_at: DateTime<Utc>) {
        self.data
            .lock()
            .unwrap()
            .status_changed
            .insert(attempt_id, changed_at);
    }
}

#[async_trait]
impl SessionProvider for InMemoryStore {
    async fn get_session_owner(&self, session_id: i64) -> Result<Option<SessionOwner>, AppError> {
        Ok(self.data.lock().unwrap().sessions.get(&session_id).cloned())
    }
}

#[async_trait]
impl MaterialProvider for InMemoryStore {
    async fn list_ready_material_texts(&self, session_id: i64) -> Result<Vec<String>, AppError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .materials
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl AttemptRepository for InMemoryStore {
    async fn find_generating_attempt(&self, session_id: i64) -> Result<Option<i64>, AppError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .attempts
            .values()
            .find(|a| a.session_id == session_id && a.status == AttemptStatus::Generating)
            .map(|a| a.id))
    }

    async fn create_attempt(&self, attempt: &NewAttempt) -> Result<QuizAttempt, AppError> {
        let mut data = self.data.lock().unwrap();
        // Mirrors the partial unique index.
        if data
            .attempts
            .values()
            .any(|a| a.session_id == attempt.session_id && a.status == AttemptStatus::Generating)
        {
            return Err(AppError::Conflict(
                "A quiz is already being generated for this session".to_string(),
            ));
        }

        let now = Utc::now();
        let created = QuizAttempt {
            id: data.next_id(),
            session_id: attempt.session_id,
            user_id: attempt.user_id,
            difficulty: attempt.difficulty,
            answer_format: attempt.answer_format,
            requested_count: attempt.requested_count,
            question_count: 0,
            used_materials: attempt.used_materials,
            status: AttemptStatus::Generating,
            score: None,
            started_at: now,
            completed_at: None,
            created_at: now,
        };
        data.attempts.insert(created.id, created.clone());
        data.status_changed.insert(created.id, now);
        Ok(created)
    }

    async fn insert_question(
        &self,
        attempt_id: i64,
        question: &NewQuestion,
    ) -> Result<Question, AppError> {
        if *self.fail_question_insert.lock().unwrap() == Some(question.question_number) {
            return Err(AppError::InternalServerError("disk full".to_string()));
        }

        let stored = {
            let mut data = self.data.lock().unwrap();
            let stored = Question {
                id: data.next_id(),
                attempt_id,
                question_number: question.question_number,
                prompt: question.prompt.clone(),
                correct_answer: question.correct_answer.clone(),
                explanation: question.explanation.clone(),
                difficulty: question.difficulty,
                concept_tags: question.concept_tags.clone(),
            };
            let answer = Answer {
                id: data.next_id(),
                question_id: stored.id,
                attempt_id,
                user_answer: None,
                submitted_at: None,
                score: None,
                is_correct: None,
                feedback: None,
                graded_at: None,
            };
            data.questions.push(stored.clone());
            data.answers.push(answer);
            stored
        };

        if let Some(hook) = self.on_question_insert.lock().unwrap().as_ref() {
            hook(question.question_number);
        }
        Ok(stored)
    }

    async fn finish_generation(
        &self,
        attempt_id: i64,
        question_count: i32,
    ) -> Result<(), AppError> {
        let mut data = self.data.lock().unwrap();
        match data.attempts.get_mut(&attempt_id) {
            Some(a) if a.status == AttemptStatus::Generating => {
                a.question_count = question_count;
                data.set_status(attempt_id, AttemptStatus::InProgress);
                Ok(())
            }
            _ => Err(AppError::Conflict("not generating".to_string())),
        }
    }

    async fn get_attempt(&self, attempt_id: i64) -> Result<Option<QuizAttempt>, AppError> {
        Ok(self.data.lock().unwrap().attempts.get(&attempt_id).cloned())
    }

    async fn list_questions(&self, attempt_id: i64) -> Result<Vec<Question>, AppError> {
        Ok(self.questions_of(attempt_id))
    }

    async fn list_answers(&self, attempt_id: i64) -> Result<Vec<Answer>, AppError> {
        Ok(self.answers_of(attempt_id))
    }

    async fn save_answer(
        &self,
        attempt_id: i64,
        question_id: i64,
        text: &str,
    ) -> Result<AnswerWrite, AppError> {
        let mut data = self.data.lock().unwrap();
        let open = data
            .attempts
            .get(&attempt_id)
            .is_some_and(|a| a.status == AttemptStatus::InProgress);
        match data
            .answers
            .iter_mut()
            .find(|a| a.attempt_id == attempt_id && a.question_id == question_id)
        {
            Some(_) if !open => Ok(AnswerWrite::Locked),
            Some(answer) => {
                answer.user_answer = Some(text.to_string());
                answer.submitted_at = Some(Utc::now());
                Ok(AnswerWrite::Saved)
            }
            None => Ok(AnswerWrite::UnknownQuestion),
        }
    }

    async fn transition_status(
        &self,
        attempt_id: i64,
        from: AttemptStatus,
        to: AttemptStatus,
    ) -> Result<bool, AppError> {
        let mut data = self.data.lock().unwrap();
        match data.attempts.get(&attempt_id) {
            Some(a) if a.status == from => {
                data.set_status(attempt_id, to);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_grade(&self, answer_id: i64, grade: &AnswerGrade) -> Result<(), AppError> {
        if self.fail_grade_writes.lock().unwrap().contains(&answer_id) {
            return Err(AppError::InternalServerError("connection reset".to_string()));
        }

        let mut data = self.data.lock().unwrap();
        let answer = data
            .answers
            .iter_mut()
            .find(|a| a.id == answer_id)
            .ok_or_else(|| AppError::NotFound("answer".to_string()))?;
        answer.score = Some(grade.score);
        answer.is_correct = Some(grade.is_correct());
        answer.feedback = grade.feedback.clone();
        answer.graded_at = Some(Utc::now());
        Ok(())
    }

    async fn complete_attempt(&self, attempt_id: i64, score: f64) -> Result<(), AppError> {
        let mut data = self.data.lock().unwrap();
        match data.attempts.get_mut(&attempt_id) {
            Some(a) if a.status == AttemptStatus::Grading => {
                a.score = Some(score);
                a.completed_at = Some(Utc::now());
                data.set_status(attempt_id, AttemptStatus::Completed);
                Ok(())
            }
            _ => Err(AppError::Conflict("not grading".to_string())),
        }
    }

    async fn sweep_stale_attempts(&self, cutoff: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let mut guard = self.data.lock().unwrap();
        let data = &mut *guard;
        let mut counts: HashMap<i64, i32> = HashMap::new();
        for question in &data.questions {
            *counts.entry(question.attempt_id).or_default() += 1;
        }

        let mut report = SweepReport::default();
        let mut moves = Vec::new();
        for attempt in data.attempts.values_mut() {
            match attempt.status {
                AttemptStatus::Generating if attempt.created_at < cutoff => {
                    match counts.get(&attempt.id) {
                        Some(&count) => {
                            attempt.question_count = count;
                            moves.push((attempt.id, AttemptStatus::InProgress));
                            report.resumed += 1;
                        }
                        None => {
                            moves.push((attempt.id, AttemptStatus::Failed));
                            report.failed += 1;
                        }
                    }
                }
                AttemptStatus::Grading
                    if data.status_changed.get(&attempt.id).is_some_and(|t| *t < cutoff) =>
                {
                    moves.push((attempt.id, AttemptStatus::SubmittedUngraded));
                    report.ungraded += 1;
                }
                _ => {}
            }
        }
        for (id, status) in moves {
            data.set_status(id, status);
        }
        Ok(report)
    }
}

/// Replays canned model replies in order and records every request.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    /// How long each reply takes to arrive.
    latency: Mutex<Duration>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        })
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn push(&self, reply: Result<String, LlmError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::ValidationFailed("no scripted reply".to_string())))
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        rust_log: "error".to_string(),
        server_port: 0,
        llm: LlmConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            api_key: "test".to_string(),
            model: "test-model".to_string(),
            temperature: 0.0,
            timeout_secs: 5,
        },
        stream_deadline_secs: 30,
        stale_generation_minutes: 15,
    }
}

pub fn app_state(store: &Arc<InMemoryStore>, llm: &Arc<ScriptedLlm>) -> AppState {
    AppState::new(
        test_config(),
        store.clone(),
        store.clone(),
        store.clone(),
        llm.clone(),
    )
}

pub fn mcq_item(question: &str, options: [&str; 4], correct: &str) -> Value {
    json!({
        "type": "multiple_choice",
        "question": question,
        "options": options,
        "correctAnswer": correct,
        "explanation": format!("The answer is {}.", correct),
        "conceptTags": ["fundamentals"]
    })
}

pub fn free_text_item(question: &str, reference: &str) -> Value {
    json!({
        "type": "free_text",
        "question": question,
        "correctAnswer": reference,
        "explanation": "Reference answer given above.",
        "conceptTags": ["ownership", "borrowing"]
    })
}

/// A generation reply wrapping `items` the way the prompt asks for.
pub fn quiz_reply(items: Vec<Value>) -> Result<String, LlmError> {
    Ok(format!(
        "Here you go.\n<quiz_output>\n{}\n</quiz_output>",
        json!({ "questions": items })
    ))
}

/// A grading reply for `(question_number, score, feedback)` triples.
pub fn grading_reply(results: &[(i32, f64, &str)]) -> Result<String, LlmError> {
    let results: Vec<Value> = results
        .iter()
        .map(|(number, score, feedback)| {
            json!({ "questionNumber": number, "score": score, "feedback": feedback })
        })
        .collect();
    Ok(format!(
        "<grading_output>{}</grading_output>",
        json!({ "results": results })
    ))
}

/// Drains the receiver until the channel closes.
pub async fn collect(mut rx: UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("stream did not close")
    {
        events.push(event);
    }
    events
}

pub fn terminal_count(events: &[StreamEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}
