use serde::Serialize;
use std::collections::HashMap;

use super::Kpi;
use crate::approvals::{AssignmentKind, IndividualKpi};
use crate::org::Employee;

pub const UNCATEGORIZED: &str = "Uncategorized";
pub const UNASSIGNED: &str = "Unassigned";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerspectiveGroup {
    pub perspective: String,
    pub kpis: Vec<Kpi>,
}

fn perspective_key(kpi: &Kpi) -> &str {
    kpi.perspective
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(UNCATEGORIZED)
}

/// Groups in first-seen order; items keep their input order inside a group.
pub fn group_by_perspective(kpis: &[Kpi]) -> Vec<PerspectiveGroup> {
    let mut groups: Vec<PerspectiveGroup> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for kpi in kpis {
        let key = perspective_key(kpi);
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(PerspectiveGroup {
                perspective: key.to_string(),
                kpis: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].kpis.push(kpi.clone());
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentCascade {
    pub department: String,
    /// Corporate KPIs cascaded to at least one member, first-seen order.
    pub kpis: Vec<Kpi>,
    pub committed: usize,
    pub members: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualCascade {
    pub employee_id: String,
    pub name: Option<String>,
    pub department: String,
    pub assignments: Vec<IndividualKpi>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CascadeView {
    pub corporate: Vec<PerspectiveGroup>,
    pub departments: Vec<DepartmentCascade>,
    pub individuals: Vec<IndividualCascade>,
}

/// Corporate, department and individual levels, the lower two derived from
/// assignments joined to employees by id.
pub fn build_cascade(
    catalog: &[Kpi],
    employees: &[Employee],
    assignments: &[IndividualKpi],
) -> CascadeView {
    let catalog_by_id: HashMap<&str, &Kpi> = catalog.iter().map(|k| (k.id.as_str(), k)).collect();
    let employee_by_id: HashMap<&str, &Employee> =
        employees.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut individuals: Vec<IndividualCascade> = Vec::new();
    let mut individual_index: HashMap<&str, usize> = HashMap::new();
    for assignment in assignments {
        let slot = *individual_index
            .entry(assignment.employee_id.as_str())
            .or_insert_with(|| {
                let employee = employee_by_id.get(assignment.employee_id.as_str());
                let department = employee
                    .map(|e| e.department.trim())
                    .filter(|d| !d.is_empty())
                    .unwrap_or(UNASSIGNED);
                individuals.push(IndividualCascade {
                    employee_id: assignment.employee_id.clone(),
                    name: employee.map(|e| e.name.clone()),
                    department: department.to_string(),
                    assignments: Vec::new(),
                });
                individuals.len() - 1
            });
        individuals[slot].assignments.push(assignment.clone());
    }

    let mut departments: Vec<DepartmentCascade> = Vec::new();
    let mut department_index: HashMap<String, usize> = HashMap::new();
    for individual in &individuals {
        let slot = *department_index
            .entry(individual.department.clone())
            .or_insert_with(|| {
                departments.push(DepartmentCascade {
                    department: individual.department.clone(),
                    kpis: Vec::new(),
                    committed: 0,
                    members: 0,
                });
                departments.len() - 1
            });
        let department = &mut departments[slot];
        department.members += 1;
        for assignment in &individual.assignments {
            match &assignment.kind {
                AssignmentKind::Cascaded { kpi_id, .. } => {
                    let Some(kpi) = catalog_by_id.get(kpi_id.as_str()) else {
                        continue;
                    };
                    if !department.kpis.iter().any(|k| k.id == kpi.id) {
                        department.kpis.push((*kpi).clone());
                    }
                }
                AssignmentKind::Committed { .. } => department.committed += 1,
            }
        }
    }

    CascadeView {
        corporate: group_by_perspective(catalog),
        departments,
        individuals,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerspectiveSummary {
    pub perspective: String,
    pub count: usize,
    pub average_achievement: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotItem {
    pub perspective: String,
    pub measure: String,
    pub target: String,
    pub unit: String,
    pub achievement: Option<f64>,
}

/// Compact catalog summary handed to the model service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiSnapshot {
    pub total: usize,
    pub average_achievement: Option<f64>,
    pub perspectives: Vec<PerspectiveSummary>,
    pub kpis: Vec<SnapshotItem>,
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

impl KpiSnapshot {
    pub fn from_catalog(catalog: &[Kpi]) -> Self {
        let perspectives = group_by_perspective(catalog)
            .into_iter()
            .map(|group| PerspectiveSummary {
                count: group.kpis.len(),
                average_achievement: average(group.kpis.iter().filter_map(|k| k.achievement)),
                perspective: group.perspective,
            })
            .collect();
        let kpis = catalog
            .iter()
            .map(|kpi| SnapshotItem {
                perspective: perspective_key(kpi).to_string(),
                measure: kpi.measure.clone(),
                target: kpi.target.clone(),
                unit: kpi.unit.clone(),
                achievement: kpi.achievement,
            })
            .collect();

        Self {
            total: catalog.len(),
            average_achievement: average(catalog.iter().filter_map(|k| k.achievement)),
            perspectives,
            kpis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approvals::{AssignmentStatus, NamedTarget};

    fn kpi(id: &str, perspective: Option<&str>, achievement: Option<f64>) -> Kpi {
        Kpi {
            id: id.to_string(),
            perspective: perspective.map(str::to_string),
            strategic_objective: String::new(),
            measure: format!("Measure {id}"),
            target: "100".to_string(),
            unit: "%".to_string(),
            achievement,
            created_at: None,
            updated_at: None,
        }
    }

    fn employee(id: &str, department: &str) -> Employee {
        Employee {
            id: id.to_string(),
            name: format!("Name {id}"),
            department: department.to_string(),
            position: "Staff".to_string(),
            manager: None,
            email: None,
        }
    }

    fn cascaded(id: &str, employee_id: &str, kpi_id: &str) -> IndividualKpi {
        IndividualKpi {
            id: id.to_string(),
            employee_id: employee_id.to_string(),
            status: AssignmentStatus::Draft,
            kind: AssignmentKind::Cascaded {
                kpi_id: kpi_id.to_string(),
                target: "90".to_string(),
            },
        }
    }

    fn committed(id: &str, employee_id: &str) -> IndividualKpi {
        IndividualKpi {
            id: id.to_string(),
            employee_id: employee_id.to_string(),
            status: AssignmentStatus::Agreed,
            kind: AssignmentKind::Committed {
                task: "Write the onboarding guide".to_string(),
                targets: vec![NamedTarget {
                    label: "Pages".to_string(),
                    value: "20".to_string(),
                }],
            },
        }
    }

    #[test]
    fn test_grouping_keeps_first_seen_order() {
        let kpis = vec![
            kpi("1", Some("Sustainability"), None),
            kpi("2", Some("Sustainability"), None),
            kpi("3", Some("Financial"), None),
            kpi("4", None, None),
        ];
        let groups = group_by_perspective(&kpis);
        let shape: Vec<(&str, usize)> = groups
            .iter()
            .map(|g| (g.perspective.as_str(), g.kpis.len()))
            .collect();
        assert_eq!(
            shape,
            vec![("Sustainability", 2), ("Financial", 1), ("Uncategorized", 1)]
        );
        assert_eq!(groups[0].kpis[1].id, "2");
    }

    #[test]
    fn test_blank_perspective_is_uncategorized() {
        let groups = group_by_perspective(&[kpi("1", Some("  "), None), kpi("2", None, None)]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].perspective, UNCATEGORIZED);
        assert_eq!(groups[0].kpis.len(), 2);
    }

    #[test]
    fn test_empty_catalog_has_no_groups() {
        assert!(group_by_perspective(&[]).is_empty());
    }

    #[test]
    fn test_cascade_derives_departments_from_assignments() {
        let catalog = vec![kpi("K1", Some("Financial"), None), kpi("K2", Some("Customer"), None)];
        let employees = vec![employee("E1", "Sales"), employee("E2", "Sales"), employee("E3", "HR")];
        let assignments = vec![
            cascaded("A1", "E1", "K1"),
            cascaded("A2", "E2", "K1"),
            committed("A3", "E2"),
            cascaded("A4", "E3", "K2"),
            cascaded("A5", "E3", "MISSING"),
        ];

        let view = build_cascade(&catalog, &employees, &assignments);
        assert_eq!(view.corporate.len(), 2);

        let sales = &view.departments[0];
        assert_eq!(sales.department, "Sales");
        assert_eq!(sales.members, 2);
        assert_eq!(sales.committed, 1);
        assert_eq!(sales.kpis.iter().map(|k| k.id.as_str()).collect::<Vec<_>>(), vec!["K1"]);

        let hr = &view.departments[1];
        assert_eq!(hr.department, "HR");
        assert_eq!(hr.kpis.len(), 1);

        assert_eq!(view.individuals.len(), 3);
        assert_eq!(view.individuals[1].assignments.len(), 2);
        assert_eq!(view.individuals[0].name.as_deref(), Some("Name E1"));
    }

    #[test]
    fn test_unknown_employee_goes_to_unassigned() {
        let catalog = vec![kpi("K1", None, None)];
        let view = build_cascade(&catalog, &[], &[cascaded("A1", "GHOST", "K1")]);
        assert_eq!(view.departments[0].department, UNASSIGNED);
        assert_eq!(view.individuals[0].name, None);
    }

    #[test]
    fn test_snapshot_averages_known_achievements() {
        let catalog = vec![
            kpi("1", Some("Financial"), Some(80.0)),
            kpi("2", Some("Financial"), Some(100.0)),
            kpi("3", Some("Customer"), None),
        ];
        let snapshot = KpiSnapshot::from_catalog(&catalog);
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.average_achievement, Some(90.0));
        assert_eq!(snapshot.perspectives[0].average_achievement, Some(90.0));
        assert_eq!(snapshot.perspectives[1].average_achievement, None);
        assert_eq!(snapshot.kpis[2].perspective, "Customer");
    }
}
