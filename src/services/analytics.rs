// src/services/analytics.rs

use std::collections::BTreeMap;

use crate::models::{
    analytics::{
        Analytics, Breakdown, Insight, InsightDimension, PerformanceMetrics, QuestionTiming,
        TimeAnalysis,
    },
    exam_record::QuestionResult,
};

/// Percentages at or above `strength` are strengths; at or below `weakness`
/// are weaknesses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyticsThresholds {
    pub strength: f64,
    pub weakness: f64,
}

impl Default for AnalyticsThresholds {
    fn default() -> Self {
        Self {
            strength: 80.0,
            weakness: 50.0,
        }
    }
}

#[derive(Default)]
struct Tally {
    total: u32,
    correct: u32,
    timed: u32,
    time_sum: u64,
}

impl Tally {
    fn add(&mut self, r: &QuestionResult) {
        self.total += 1;
        if r.is_correct {
            self.correct += 1;
        }
        if r.time_spent_seconds > 0 {
            self.timed += 1;
            self.time_sum += u64::from(r.time_spent_seconds);
        }
    }

    fn breakdown(&self) -> Breakdown {
        Breakdown {
            total: self.total,
            correct: self.correct,
            percentage: percent(self.correct, self.total),
            average_time_seconds: if self.timed == 0 {
                0.0
            } else {
                self.time_sum as f64 / f64::from(self.timed)
            },
        }
    }
}

fn percent(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * f64::from(part) / f64::from(whole)
    }
}

fn breakdown_by<F>(results: &[QuestionResult], key: F) -> BTreeMap<String, Breakdown>
where
    F: Fn(&QuestionResult) -> String,
{
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
    for r in results {
        tallies.entry(key(r)).or_default().add(r);
    }
    tallies
        .into_iter()
        .map(|(name, tally)| (name, tally.breakdown()))
        .collect()
}

fn time_analysis(results: &[QuestionResult]) -> TimeAnalysis {
    let timed: Vec<&QuestionResult> = results.iter().filter(|r| r.time_spent_seconds > 0).collect();
    if timed.is_empty() {
        return TimeAnalysis::default();
    }

    let total: u64 = timed.iter().map(|r| u64::from(r.time_spent_seconds)).sum();
    let correct = results.iter().filter(|r| r.is_correct).count();
    let timing = |r: &&QuestionResult| QuestionTiming {
        question_id: r.question_id,
        seconds: r.time_spent_seconds,
    };

    TimeAnalysis {
        average_time_per_question: total as f64 / timed.len() as f64,
        fastest_question: timed.iter().min_by_key(|r| r.time_spent_seconds).map(timing),
        slowest_question: timed.iter().max_by_key(|r| r.time_spent_seconds).map(timing),
        efficiency: Some(correct as f64 / (total as f64 / 60.0)),
    }
}

fn insights(
    dimension: InsightDimension,
    breakdown: &BTreeMap<String, Breakdown>,
    thresholds: &AnalyticsThresholds,
    strengths: &mut Vec<Insight>,
    weaknesses: &mut Vec<Insight>,
) {
    for (name, b) in breakdown.iter().filter(|(_, b)| b.total > 0) {
        let insight = Insight {
            dimension,
            name: name.clone(),
            percentage: b.percentage,
        };
        if b.percentage >= thresholds.strength {
            strengths.push(insight);
        } else if b.percentage <= thresholds.weakness {
            weaknesses.push(insight);
        }
    }
}

/// Derives breakdowns and advisory insights from scored questions.
/// `total_time_seconds` is the session's summed answering time.
pub fn analyze(
    results: &[QuestionResult],
    total_time_seconds: u64,
    thresholds: &AnalyticsThresholds,
) -> Analytics {
    let difficulty_breakdown = breakdown_by(results, |r| r.difficulty.to_string());
    let category_breakdown = breakdown_by(results, |r| r.category.clone());

    let total = results.len() as u32;
    let correct = results.iter().filter(|r| r.is_correct).count() as u32;
    let performance = PerformanceMetrics {
        accuracy: percent(correct, total),
        speed: if total_time_seconds > 0 {
            f64::from(total) / (total_time_seconds as f64 / 60.0)
        } else {
            0.0
        },
    };

    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();
    insights(
        InsightDimension::Difficulty,
        &difficulty_breakdown,
        thresholds,
        &mut strengths,
        &mut weaknesses,
    );
    insights(
        InsightDimension::Category,
        &category_breakdown,
        thresholds,
        &mut strengths,
        &mut weaknesses,
    );

    Analytics {
        difficulty_breakdown,
        category_breakdown,
        time_analysis: time_analysis(results),
        performance,
        strengths,
        weaknesses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::Difficulty;

    fn result(id: i64, difficulty: Difficulty, category: &str, correct: bool, time: u32) -> QuestionResult {
        QuestionResult {
            question_id: id,
            difficulty,
            category: category.to_string(),
            answered: time > 0,
            is_correct: correct,
            points_awarded: 0,
            points_possible: 1,
            time_spent_seconds: time,
            selected_options: None,
            text_answer: None,
            correct_answer: vec!["A".into()],
            review_marked: false,
        }
    }

    fn sample() -> Vec<QuestionResult> {
        vec![
            result(1, Difficulty::Easy, "algebra", true, 30),
            result(2, Difficulty::Easy, "algebra", true, 10),
            result(3, Difficulty::Medium, "geometry", false, 60),
            result(4, Difficulty::Hard, "geometry", false, 0),
        ]
    }

    #[test]
    fn test_breakdowns() {
        let a = analyze(&sample(), 100, &AnalyticsThresholds::default());

        let easy = a.difficulty_breakdown["easy"];
        assert_eq!((easy.total, easy.correct), (2, 2));
        assert_eq!(easy.percentage, 100.0);
        assert_eq!(easy.average_time_seconds, 20.0);

        let hard = a.difficulty_breakdown["hard"];
        assert_eq!(hard.percentage, 0.0);
        assert_eq!(hard.average_time_seconds, 0.0);

        let geometry = a.category_breakdown["geometry"];
        assert_eq!((geometry.total, geometry.correct), (2, 0));
    }

    #[test]
    fn test_time_analysis_skips_untimed() {
        let a = analyze(&sample(), 100, &AnalyticsThresholds::default());
        let t = a.time_analysis;

        assert!((t.average_time_per_question - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(t.fastest_question.unwrap().question_id, 2);
        assert_eq!(t.slowest_question.unwrap().question_id, 3);
        assert!((t.efficiency.unwrap() - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_performance_metrics() {
        let a = analyze(&sample(), 120, &AnalyticsThresholds::default());
        assert_eq!(a.performance.accuracy, 50.0);
        assert_eq!(a.performance.speed, 2.0);

        let idle = analyze(&sample(), 0, &AnalyticsThresholds::default());
        assert_eq!(idle.performance.speed, 0.0);
    }

    #[test]
    fn test_strengths_and_weaknesses() {
        let a = analyze(&sample(), 100, &AnalyticsThresholds::default());

        let strong: Vec<_> = a.strengths.iter().map(|i| i.name.as_str()).collect();
        let weak: Vec<_> = a.weaknesses.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(strong, vec!["easy", "algebra"]);
        assert_eq!(weak, vec!["hard", "medium", "geometry"]);
    }

    #[test]
    fn test_empty_results() {
        let a = analyze(&[], 0, &AnalyticsThresholds::default());
        assert!(a.difficulty_breakdown.is_empty());
        assert_eq!(a.performance.accuracy, 0.0);
        assert_eq!(a.time_analysis, TimeAnalysis::default());
    }
}
