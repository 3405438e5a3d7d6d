use serde::Serialize;
use std::collections::HashMap;

use crate::store::{ActivityDef, ActivityScore, Group, Roster};

/// 2-decimal half-away-from-zero rounding used for every persisted average.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standing {
    Aprobado,
    Reprobado,
    Desertor,
}

/// Three-way classification applied to both unit and final averages:
/// (0, 70) failed, [70, 100] passed, everything else (including exactly 0)
/// counts as a dropout.
pub fn classify(score: f64) -> Standing {
    if score > 0.0 && score < 70.0 {
        Standing::Reprobado
    } else if (70.0..=100.0).contains(&score) {
        Standing::Aprobado
    } else {
        Standing::Desertor
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StandingCounts {
    pub aprobados: i64,
    pub reprobados: i64,
    pub desertores: i64,
}

impl StandingCounts {
    pub fn tally(&mut self, standing: Standing) {
        match standing {
            Standing::Aprobado => self.aprobados += 1,
            Standing::Reprobado => self.reprobados += 1,
            Standing::Desertor => self.desertores += 1,
        }
    }
}

/// Weighted unit average over name-matched activities. The denominator is
/// the weight actually present, not a fixed 100: a unit with only part of
/// its activities matched still yields a proportional average over the
/// matched subset. No matched weight means 0.
pub fn unit_average(defs: &[ActivityDef], scores: &[ActivityScore]) -> f64 {
    let weights: HashMap<&str, f64> = defs
        .iter()
        .map(|a| (a.name.as_str(), a.weight))
        .collect();

    let mut weighted_sum = 0.0_f64;
    let mut total_weight = 0.0_f64;
    for score in scores {
        let Some(&weight) = weights.get(score.activity_name.as_str()) else {
            continue;
        };
        if weight <= 0.0 {
            continue;
        }
        weighted_sum += score.score * weight / 100.0;
        total_weight += weight;
    }

    if total_weight > 0.0 {
        round2(weighted_sum / total_weight * 100.0)
    } else {
        0.0
    }
}

/// Averaging Engine: recomputes every unit average, every student final,
/// and the roster-level average in place. Pure over the loaded documents;
/// the caller persists. Re-running with unchanged scores is a no-op.
///
/// A grade record whose unit number matches no group unit keeps its stored
/// average, adds nothing to the final-average numerator, and still counts
/// in the denominator. After roster initialization that branch is
/// unreachable.
pub fn recompute_roster(group: &Group, roster: &mut Roster) {
    let mut total_final = 0.0_f64;
    for student in &mut roster.students {
        let mut sum = 0.0_f64;
        for grade in &mut student.grades {
            if let Some(unit) = group.units.iter().find(|u| u.number == grade.unit_number) {
                grade.unit_average = unit_average(&unit.activities, &grade.scores);
                sum += grade.unit_average;
            }
        }
        student.final_average = if student.grades.is_empty() {
            0.0
        } else {
            round2(sum / student.grades.len() as f64)
        };
        total_final += student.final_average;
    }
    roster.final_average = if roster.students.is_empty() {
        0.0
    } else {
        round2(total_final / roster.students.len() as f64)
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnitStatistics {
    pub unidad: i64,
    #[serde(flatten)]
    pub counts: StandingCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalPercentages {
    pub aprobados: String,
    pub reprobados: String,
    pub desertores: String,
}

/// Ten-bucket histogram of final averages: [0,10) ... [80,90), [90,100].
/// Exactly 0 lands in the first bucket, so the buckets always sum to the
/// student total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AverageRange {
    #[serde(rename = "Rango_0_9")]
    pub rango_0_9: i64,
    #[serde(rename = "Rango_10_19")]
    pub rango_10_19: i64,
    #[serde(rename = "Rango_20_29")]
    pub rango_20_29: i64,
    #[serde(rename = "Rango_30_39")]
    pub rango_30_39: i64,
    #[serde(rename = "Rango_40_49")]
    pub rango_40_49: i64,
    #[serde(rename = "Rango_50_59")]
    pub rango_50_59: i64,
    #[serde(rename = "Rango_60_69")]
    pub rango_60_69: i64,
    #[serde(rename = "Rango_70_79")]
    pub rango_70_79: i64,
    #[serde(rename = "Rango_80_89")]
    pub rango_80_89: i64,
    #[serde(rename = "Rango_90_100")]
    pub rango_90_100: i64,
}

impl AverageRange {
    pub fn record(&mut self, average: f64) {
        if (0.0..10.0).contains(&average) {
            self.rango_0_9 += 1;
        } else if (10.0..20.0).contains(&average) {
            self.rango_10_19 += 1;
        } else if (20.0..30.0).contains(&average) {
            self.rango_20_29 += 1;
        } else if (30.0..40.0).contains(&average) {
            self.rango_30_39 += 1;
        } else if (40.0..50.0).contains(&average) {
            self.rango_40_49 += 1;
        } else if (50.0..60.0).contains(&average) {
            self.rango_50_59 += 1;
        } else if (60.0..70.0).contains(&average) {
            self.rango_60_69 += 1;
        } else if (70.0..80.0).contains(&average) {
            self.rango_70_79 += 1;
        } else if (80.0..90.0).contains(&average) {
            self.rango_80_89 += 1;
        } else if (90.0..=100.0).contains(&average) {
            self.rango_90_100 += 1;
        }
    }

    pub fn total(&self) -> i64 {
        self.rango_0_9
            + self.rango_10_19
            + self.rango_20_29
            + self.rango_30_39
            + self.rango_40_49
            + self.rango_50_59
            + self.rango_60_69
            + self.rango_70_79
            + self.rango_80_89
            + self.rango_90_100
    }
}

pub fn percent_value(count: i64, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(count as f64 * 100.0 / total as f64)
}

pub fn percent_label(count: i64, total: usize) -> String {
    format!("{:.2}%", percent_value(count, total))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStatistics {
    pub students_total: usize,
    pub final_average_group: f64,
    pub units: Vec<UnitStatistics>,
    #[serde(rename = "final")]
    pub finals: StandingCounts,
    pub final_percentages: FinalPercentages,
    pub average_range: AverageRange,
}

/// Statistics Aggregator: classifies every student per unit and per final
/// average. Unit counts are keyed by unit number so write-back never depends
/// on list order. Pure; the caller persists the counters.
pub fn compute_group_statistics(group: &Group, roster: &Roster) -> GroupStatistics {
    let students_total = roster.students.len();

    let units: Vec<UnitStatistics> = group
        .units
        .iter()
        .map(|unit| {
            let mut counts = StandingCounts::default();
            for student in &roster.students {
                if let Some(grade) = student
                    .grades
                    .iter()
                    .find(|g| g.unit_number == unit.number)
                {
                    counts.tally(classify(grade.unit_average));
                }
            }
            UnitStatistics {
                unidad: unit.number,
                counts,
            }
        })
        .collect();

    let mut finals = StandingCounts::default();
    let mut average_range = AverageRange::default();
    let mut total = 0.0_f64;
    for student in &roster.students {
        finals.tally(classify(student.final_average));
        average_range.record(student.final_average);
        total += student.final_average;
    }

    let final_average_group = if students_total == 0 {
        0.0
    } else {
        round2(total / students_total as f64)
    };

    let final_percentages = FinalPercentages {
        aprobados: percent_label(finals.aprobados, students_total),
        reprobados: percent_label(finals.reprobados, students_total),
        desertores: percent_label(finals.desertores, students_total),
    };

    GroupStatistics {
        students_total,
        final_average_group,
        units,
        finals,
        final_percentages,
        average_range,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Student, Unit, UnitGrade};

    fn def(name: &str, weight: f64) -> ActivityDef {
        ActivityDef {
            name: name.to_string(),
            weight,
        }
    }

    fn score(name: &str, value: f64) -> ActivityScore {
        ActivityScore {
            id: String::new(),
            activity_name: name.to_string(),
            score: value,
        }
    }

    #[test]
    fn round2_half_away_from_zero() {
        assert_eq!(round2(0.0), 0.0);
        assert_eq!(round2(68.004), 68.0);
        assert_eq!(round2(68.006), 68.01);
        // 0.125 is exact in binary, so the tie rounds away from zero
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(33.333333), 33.33);
    }

    #[test]
    fn classification_is_a_partition() {
        assert_eq!(classify(0.0), Standing::Desertor);
        assert_eq!(classify(0.01), Standing::Reprobado);
        assert_eq!(classify(69.99), Standing::Reprobado);
        assert_eq!(classify(70.0), Standing::Aprobado);
        assert_eq!(classify(100.0), Standing::Aprobado);
        assert_eq!(classify(100.01), Standing::Desertor);
        assert_eq!(classify(-1.0), Standing::Desertor);
    }

    #[test]
    fn unit_average_weighted_over_full_weight() {
        let defs = vec![def("Examen", 60.0), def("Tareas", 40.0)];
        let scores = vec![score("Examen", 80.0), score("Tareas", 50.0)];
        // 80*0.6 + 50*0.4 = 68 over weight 100
        assert_eq!(unit_average(&defs, &scores), 68.0);
    }

    #[test]
    fn unit_average_normalizes_against_present_weight() {
        let defs = vec![def("Examen", 60.0), def("Tareas", 40.0)];
        let scores = vec![score("Examen", 80.0)];
        // only 60 of 100 weight carries a score: 48 / 60 * 100
        assert_eq!(unit_average(&defs, &scores), 80.0);
    }

    #[test]
    fn unit_average_ignores_unmatched_names() {
        let defs = vec![def("Examen", 60.0)];
        let scores = vec![score("examen", 90.0), score("Proyecto", 100.0)];
        // name match is case-sensitive and exact; nothing matches
        assert_eq!(unit_average(&defs, &scores), 0.0);
    }

    #[test]
    fn unit_average_skips_zero_weight_definitions() {
        let defs = vec![def("Examen", 0.0), def("Tareas", 50.0)];
        let scores = vec![score("Examen", 100.0), score("Tareas", 60.0)];
        assert_eq!(unit_average(&defs, &scores), 60.0);
    }

    fn one_unit_group(defs: Vec<ActivityDef>) -> Group {
        Group {
            id: "g".to_string(),
            period_id: "p".to_string(),
            group_number: 1,
            subject_id: None,
            teacher_name: None,
            roster_id: Some("r".to_string()),
            units: vec![Unit {
                id: "u1".to_string(),
                number: 1,
                activities: defs,
                passed_count: 0,
                failed_count: 0,
                dropout_count: 0,
            }],
            general_average: 0.0,
            passed_count: 0,
            failed_count: 0,
            dropout_count: 0,
            passed_percent: 0.0,
            failed_percent: 0.0,
            dropout_percent: 0.0,
        }
    }

    fn roster_with(students: Vec<Student>) -> Roster {
        Roster {
            id: "r".to_string(),
            group_id: "g".to_string(),
            final_average: 0.0,
            students,
        }
    }

    fn student(name: &str, grades: Vec<UnitGrade>) -> Student {
        Student {
            id: name.to_string(),
            name: name.to_string(),
            control_number: name.to_string(),
            sort_order: 0,
            final_average: 0.0,
            grades,
        }
    }

    fn grade(unit_number: i64, scores: Vec<ActivityScore>) -> UnitGrade {
        UnitGrade {
            id: String::new(),
            unit_number,
            unit_average: 0.0,
            scores,
        }
    }

    #[test]
    fn recompute_roster_sets_unit_final_and_roster_averages() {
        let group = one_unit_group(vec![def("Examen", 60.0), def("Tareas", 40.0)]);
        let mut roster = roster_with(vec![
            student(
                "a",
                vec![grade(1, vec![score("Examen", 80.0), score("Tareas", 50.0)])],
            ),
            student(
                "b",
                vec![grade(1, vec![score("Examen", 100.0), score("Tareas", 100.0)])],
            ),
        ]);

        recompute_roster(&group, &mut roster);

        assert_eq!(roster.students[0].grades[0].unit_average, 68.0);
        assert_eq!(roster.students[0].final_average, 68.0);
        assert_eq!(roster.students[1].final_average, 100.0);
        assert_eq!(roster.final_average, 84.0);
    }

    #[test]
    fn recompute_roster_is_idempotent() {
        let group = one_unit_group(vec![def("Examen", 70.0), def("Tareas", 30.0)]);
        let mut roster = roster_with(vec![student(
            "a",
            vec![grade(1, vec![score("Examen", 77.7), score("Tareas", 33.3)])],
        )]);

        recompute_roster(&group, &mut roster);
        let first = (
            roster.students[0].grades[0].unit_average,
            roster.students[0].final_average,
            roster.final_average,
        );
        recompute_roster(&group, &mut roster);
        let second = (
            roster.students[0].grades[0].unit_average,
            roster.students[0].final_average,
            roster.final_average,
        );
        assert_eq!(first, second);
    }

    #[test]
    fn recompute_roster_without_students_or_units() {
        let group = one_unit_group(vec![def("Examen", 100.0)]);
        let mut empty = roster_with(vec![]);
        recompute_roster(&group, &mut empty);
        assert_eq!(empty.final_average, 0.0);

        let mut no_units = roster_with(vec![student("a", vec![])]);
        recompute_roster(&group, &mut no_units);
        assert_eq!(no_units.students[0].final_average, 0.0);
    }

    #[test]
    fn histogram_covers_every_average_once() {
        let mut range = AverageRange::default();
        for avg in [0.0, 9.99, 10.0, 55.5, 69.99, 70.0, 89.99, 90.0, 100.0] {
            range.record(avg);
        }
        assert_eq!(range.total(), 9);
        assert_eq!(range.rango_0_9, 2);
        assert_eq!(range.rango_10_19, 1);
        assert_eq!(range.rango_90_100, 2);
    }

    #[test]
    fn percent_labels_are_two_decimal_strings() {
        assert_eq!(percent_label(3, 4), "75.00%");
        assert_eq!(percent_label(1, 3), "33.33%");
        assert_eq!(percent_label(0, 0), "0.00%");
    }

    #[test]
    fn statistics_counts_and_percentages() {
        let group = one_unit_group(vec![def("Examen", 100.0)]);
        let mut roster = roster_with(vec![
            student("a", vec![grade(1, vec![score("Examen", 90.0)])]),
            student("b", vec![grade(1, vec![score("Examen", 75.0)])]),
            student("c", vec![grade(1, vec![score("Examen", 70.0)])]),
            student("d", vec![grade(1, vec![score("Examen", 40.0)])]),
        ]);
        recompute_roster(&group, &mut roster);

        let stats = compute_group_statistics(&group, &roster);
        assert_eq!(stats.students_total, 4);
        assert_eq!(stats.units.len(), 1);
        assert_eq!(stats.units[0].unidad, 1);
        assert_eq!(stats.units[0].counts.aprobados, 3);
        assert_eq!(stats.units[0].counts.reprobados, 1);
        assert_eq!(stats.finals.aprobados, 3);
        assert_eq!(stats.final_percentages.aprobados, "75.00%");
        assert_eq!(stats.final_percentages.reprobados, "25.00%");
        assert_eq!(stats.average_range.total(), 4);
        assert_eq!(stats.final_average_group, round2((90.0 + 75.0 + 70.0 + 40.0) / 4.0));
    }

    #[test]
    fn statistics_zero_average_is_dropout_and_first_bucket() {
        let group = one_unit_group(vec![def("Examen", 100.0)]);
        let mut roster = roster_with(vec![student(
            "a",
            vec![grade(1, vec![score("Examen", 0.0)])],
        )]);
        recompute_roster(&group, &mut roster);

        let stats = compute_group_statistics(&group, &roster);
        assert_eq!(stats.finals.desertores, 1);
        assert_eq!(stats.units[0].counts.desertores, 1);
        assert_eq!(stats.average_range.rango_0_9, 1);
        assert_eq!(stats.average_range.total(), 1);
    }

    #[test]
    fn statistics_with_empty_roster() {
        let group = one_unit_group(vec![def("Examen", 100.0)]);
        let roster = roster_with(vec![]);
        let stats = compute_group_statistics(&group, &roster);
        assert_eq!(stats.students_total, 0);
        assert_eq!(stats.final_average_group, 0.0);
        assert_eq!(stats.final_percentages.aprobados, "0.00%");
        assert_eq!(stats.average_range.total(), 0);
    }
}
