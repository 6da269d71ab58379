pub mod answer;
pub mod attempt;
pub mod question;
pub mod round_result;
pub mod session;
pub mod timer;

pub use answer::{
    AnswerRecord, AnswerWrite, GradingOutcome, RecordAnswerRequest, RecordAnswerResponse,
    ScoreOutcome,
};
pub use attempt::{
    Attempt, AttemptRanking, AttemptRound, FinalGrade, LeaderboardEntry, LearnerStats,
    RankingUpdate,
};
pub use question::{
    CorrectnessSpec, GradingSchema, Question, QuestionOption, QuestionType, QuestionView,
};
pub use round_result::{RoundCompleted, RoundResult};
pub use session::{
    AdaptiveRoundRequest, GenerationParams, NewRound, PriorAnswer, ResumeState, RoundSession,
    SessionStatus, SessionValidation, SessionView, StartRoundRequest, StartRoundResponse,
    ValidationIssue,
};
pub use timer::TimerEvent;
