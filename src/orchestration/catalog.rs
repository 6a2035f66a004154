//! Built-in fitness catalog: agent interfaces, mock agents answering them,
//! and the stock workflows and compositions built on top.

use serde_json::{json, Value};

use crate::config::{AgentConfig, MockBehavior};
use crate::domain::{
    AgentComposition, AgentRole, CapabilityInterface, CompositionNode, CompositionType, FieldKind,
    FieldSpec, Payload, Shape, StepConditions, Topology, WorkflowDefinition, WorkflowStep,
};

pub const FABRIC_SENSOR: &str = "coresense-fabric-sensor";
pub const AI_COACH: &str = "coresense-ai-coach";
pub const NUTRITION_COACH: &str = "external-nutrition-coach";
pub const PHYSIOTHERAPY: &str = "physiotherapy-assistant";
pub const SESSION_ORCHESTRATOR: &str = "coresense-orchestrator";

fn interface(agent_id: &str, capabilities: &[&str], tags: &[&str], input: Shape, output: Shape) -> CapabilityInterface {
    CapabilityInterface {
        agent_id: agent_id.to_string(),
        input_shape: input,
        output_shape: output,
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        compatibility_tags: tags.iter().map(|t| t.to_string()).collect(),
        version: "1.0.0".to_string(),
    }
}

fn optional(kind: FieldKind) -> FieldSpec {
    FieldSpec::new(kind)
}

pub fn interfaces() -> Vec<CapabilityInterface> {
    vec![
        interface(
            FABRIC_SENSOR,
            &["muscle_activation_analysis", "compensation_detection"],
            &["fitness", "analysis", "real-time", "muscle-data"],
            Shape::default()
                .field("exercise", FieldSpec::required(FieldKind::String))
                .field("stability_score", FieldSpec::required(FieldKind::Number))
                .field("duration", optional(FieldKind::Number)),
            Shape::default()
                .field("muscle_zones", optional(FieldKind::Object))
                .field("compensation_detected", optional(FieldKind::Boolean))
                .field("recommendations", optional(FieldKind::Array)),
        ),
        interface(
            AI_COACH,
            &["personalized_coaching", "progress_analysis"],
            &["fitness", "coaching", "personalization", "guidance"],
            Shape::default()
                .field("user_profile", optional(FieldKind::Object))
                .field("current_exercise", FieldSpec::required(FieldKind::String))
                .field("muscle_data", FieldSpec::required(FieldKind::Object))
                .field("goals", optional(FieldKind::Array))
                .field("nutrition_data", optional(FieldKind::Object))
                .field("assessment_data", optional(FieldKind::Any)),
            Shape::default()
                .field("coaching_message", optional(FieldKind::String))
                .field("form_corrections", optional(FieldKind::Array))
                .field("next_exercise", optional(FieldKind::String))
                .field("difficulty_adjustment", optional(FieldKind::Number)),
        ),
        interface(
            NUTRITION_COACH,
            &["nutrition_analysis", "meal_planning"],
            &["nutrition", "wellness", "planning", "health"],
            Shape::default()
                .field("fitness_goals", FieldSpec::required(FieldKind::Array))
                .field("current_activity", optional(FieldKind::String))
                .field("user_profile", optional(FieldKind::Object)),
            Shape::default()
                .field("nutrition_plan", optional(FieldKind::Object))
                .field("meal_suggestions", optional(FieldKind::Array))
                .field("supplements", optional(FieldKind::Array)),
        ),
        interface(
            PHYSIOTHERAPY,
            &["injury_assessment", "recovery_planning"],
            &["medical", "rehabilitation", "therapy", "recovery"],
            Shape::default()
                .field("symptoms", FieldSpec::required(FieldKind::Array))
                .field("injury_history", optional(FieldKind::Object))
                .field("current_pain_level", optional(FieldKind::Number)),
            Shape::default()
                .field("assessment", optional(FieldKind::String))
                .field("exercises", optional(FieldKind::Array))
                .field("frequency", optional(FieldKind::String))
                .field("follow_up", optional(FieldKind::String)),
        ),
        interface(
            SESSION_ORCHESTRATOR,
            &["session_management", "multi_agent_coordination"],
            &["fitness", "coordination"],
            Shape::open(),
            Shape::open(),
        ),
    ]
}

fn behavior(capability: &str, response: Value, cost: f64, latency_ms: u64) -> MockBehavior {
    MockBehavior {
        response,
        cost,
        latency_ms,
        ..MockBehavior::new(capability)
    }
}

/// Mock agents backing every built-in interface
pub fn agents() -> Vec<AgentConfig> {
    let muscle_zones = json!({"core": 0.82, "lower_back": 0.35, "glutes": 0.64, "obliques": 0.71});
    vec![
        AgentConfig {
            agent_id: FABRIC_SENSOR.to_string(),
            behaviors: vec![
                behavior(
                    "muscle_activation_analysis",
                    json!({
                        "exercise": "{{ exercise | default(value='unknown') }}",
                        "muscle_zones": muscle_zones,
                        "compensation_detected": false,
                        "recommendations": ["Engage transverse abdominis", "Keep hips level"]
                    }),
                    0.05,
                    15,
                ),
                behavior(
                    "compensation_detection",
                    json!({
                        "muscle_zones": muscle_zones,
                        "compensation_detected": true,
                        "recommendations": ["Reduce lumbar extension", "Shorten hold time"]
                    }),
                    0.05,
                    15,
                ),
            ],
        },
        AgentConfig {
            agent_id: AI_COACH.to_string(),
            behaviors: vec![
                behavior(
                    "personalized_coaching",
                    json!({
                        "coaching_message": "Nice work on {{ current_exercise | default(value='your session') }}. Keep your core braced and breathe steadily.",
                        "form_corrections": ["Draw navel toward spine", "Neutral neck"],
                        "next_exercise": "side_plank",
                        "difficulty_adjustment": 0.1
                    }),
                    0.05,
                    15,
                ),
                behavior(
                    "progress_analysis",
                    json!({
                        "coaching_message": "Core stability improved over the last sessions.",
                        "form_corrections": [],
                        "next_exercise": "dead_bug",
                        "difficulty_adjustment": 0.05
                    }),
                    0.05,
                    15,
                ),
            ],
        },
        AgentConfig {
            agent_id: NUTRITION_COACH.to_string(),
            behaviors: ["nutrition_analysis", "meal_planning"]
                .iter()
                .map(|capability| {
                    behavior(
                        capability,
                        json!({
                            "nutrition_plan": {"calories": 2200, "protein": "140g", "carbs": "220g", "fat": "80g"},
                            "meal_suggestions": [
                                "High-protein breakfast with oats",
                                "Quinoa salad for lunch",
                                "Grilled salmon with vegetables"
                            ],
                            "supplements": ["Vitamin D", "Omega-3"]
                        }),
                        0.15,
                        45,
                    )
                })
                .collect(),
        },
        AgentConfig {
            agent_id: PHYSIOTHERAPY.to_string(),
            behaviors: ["injury_assessment", "recovery_planning"]
                .iter()
                .map(|capability| {
                    behavior(
                        capability,
                        json!({
                            "assessment": "Lower back tension detected",
                            "exercises": ["Cat-cow stretches", "Gentle spinal twists", "Hip flexor stretches"],
                            "frequency": "2x daily for 1 week",
                            "follow_up": "Check progress in 7 days"
                        }),
                        0.30,
                        68,
                    )
                })
                .collect(),
        },
        AgentConfig {
            agent_id: SESSION_ORCHESTRATOR.to_string(),
            behaviors: vec![
                behavior("session_management", Value::Null, 0.05, 15),
                behavior("multi_agent_coordination", Value::Null, 0.05, 15),
            ],
        },
    ]
}

fn input(value: Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}

fn described(mut workflow: WorkflowDefinition, name: &str, description: &str, timeout_secs: u64) -> WorkflowDefinition {
    workflow.name = name.to_string();
    workflow.description = description.to_string();
    workflow.global_timeout_secs = timeout_secs;
    workflow
}

pub fn workflows() -> Vec<WorkflowDefinition> {
    let assessment = WorkflowDefinition::new(
        "comprehensive_fitness_assessment",
        Topology::Sequential,
        vec![
            WorkflowStep::new("muscle_analysis", FABRIC_SENSOR, "muscle_activation_analysis")
                .with_input(input(json!({"exercise": "assessment_plank", "duration": 60}))),
            WorkflowStep::new("compensation_check", FABRIC_SENSOR, "compensation_detection")
                .depends_on(["muscle_analysis"]),
            WorkflowStep::new("injury_assessment", PHYSIOTHERAPY, "injury_assessment")
                .depends_on(["compensation_check"]),
            WorkflowStep::new("nutrition_analysis", NUTRITION_COACH, "nutrition_analysis")
                .depends_on(["muscle_analysis"]),
            WorkflowStep::new("personalized_plan", AI_COACH, "personalized_coaching").depends_on([
                "compensation_check",
                "injury_assessment",
                "nutrition_analysis",
            ]),
        ],
    )
    .with_cost_limit(2.0);

    let coaching = WorkflowDefinition::new(
        "realtime_coaching_session",
        Topology::Hybrid,
        vec![
            WorkflowStep::new("session_start", SESSION_ORCHESTRATOR, "session_management")
                .with_input(input(json!({"action": "start_session"}))),
            WorkflowStep::new("continuous_monitoring", FABRIC_SENSOR, "muscle_activation_analysis")
                .with_input(input(json!({"mode": "continuous"})))
                .depends_on(["session_start"]),
            WorkflowStep::new("real_time_coaching", AI_COACH, "personalized_coaching")
                .with_input(input(json!({"mode": "realtime"})))
                .depends_on(["continuous_monitoring"])
                .with_conditions(StepConditions {
                    require_success: vec!["continuous_monitoring".to_string()],
                    ..Default::default()
                }),
        ],
    )
    .with_cost_limit(5.0);

    let team = WorkflowDefinition::new(
        "team_training_orchestration",
        Topology::Parallel,
        vec![
            WorkflowStep::new("team_assessment", SESSION_ORCHESTRATOR, "multi_agent_coordination")
                .with_input(input(json!({"mode": "team_analysis"}))),
            WorkflowStep::new("individual_analysis_1", FABRIC_SENSOR, "muscle_activation_analysis")
                .with_input(input(json!({"user_id": "user_1"})))
                .depends_on(["team_assessment"]),
            WorkflowStep::new("individual_analysis_2", FABRIC_SENSOR, "muscle_activation_analysis")
                .with_input(input(json!({"user_id": "user_2"})))
                .depends_on(["team_assessment"]),
            WorkflowStep::new("team_coaching", AI_COACH, "personalized_coaching")
                .with_input(input(json!({"mode": "team"})))
                .depends_on(["individual_analysis_1", "individual_analysis_2"]),
        ],
    )
    .with_cost_limit(10.0);

    vec![
        described(
            assessment,
            "Comprehensive Fitness Assessment",
            "Complete fitness analysis using multiple specialized agents",
            600,
        ),
        described(
            coaching,
            "Real-time Coaching Session",
            "Live coaching with real-time feedback and adjustments",
            1800,
        ),
        described(
            team,
            "Team Training Orchestration",
            "Coordinate training for multiple users simultaneously",
            900,
        ),
    ]
}

fn shape(fields: &[(&str, FieldKind, bool)]) -> Shape {
    fields.iter().fold(Shape::default(), |shape, (name, kind, required)| {
        let spec = if *required {
            FieldSpec::required(*kind)
        } else {
            FieldSpec::new(*kind)
        };
        shape.field(*name, spec)
    })
}

fn composition(
    composition_id: &str,
    name: &str,
    description: &str,
    kind: CompositionType,
    nodes: Vec<CompositionNode>,
    metadata: Value,
) -> AgentComposition {
    let mut composition = AgentComposition::new(composition_id, kind, nodes);
    composition.name = name.to_string();
    composition.description = description.to_string();
    composition.metadata = metadata.as_object().cloned().unwrap_or_default();
    composition
}

pub fn compositions() -> Vec<AgentComposition> {
    let mut wellness = composition(
        "complete-wellness-analysis",
        "Complete Wellness Analysis",
        "Comprehensive analysis combining muscle, nutrition, and mental wellness",
        CompositionType::HierarchicalTree,
        vec![
            CompositionNode::new("muscle_analysis", FABRIC_SENSOR, AgentRole::Primary)
                .map_input("exercise", "user_exercise")
                .map_input("stability_score", "user_stability")
                .map_output("muscle_data", "muscle_zones")
                .map_output("compensation", "compensation_detected"),
            CompositionNode::new("nutrition_planning", NUTRITION_COACH, AgentRole::Secondary)
                .map_input("fitness_goals", "user_goals")
                .map_input("current_activity", "user_exercise")
                .map_output("nutrition_recommendations", "nutrition_plan"),
            CompositionNode::new("coaching_synthesis", AI_COACH, AgentRole::Aggregator)
                .map_input("muscle_data", "muscle_analysis.muscle_data")
                .map_input("nutrition_data", "nutrition_planning.nutrition_recommendations")
                .map_input("current_exercise", "user_exercise")
                .map_output("final_recommendations", "coaching_message")
                .map_output("next_steps", "form_corrections"),
        ],
        json!({
            "category": "wellness",
            "complexity": "high",
            "estimated_duration": 45,
            "target_users": ["fitness_enthusiasts", "beginners", "rehabilitation"]
        }),
    );
    wellness.input_shape = shape(&[
        ("user_exercise", FieldKind::String, true),
        ("user_stability", FieldKind::Number, true),
        ("user_goals", FieldKind::Array, true),
        ("user_profile", FieldKind::Object, false),
    ]);
    wellness.output_shape = shape(&[
        ("muscle_data", FieldKind::Object, false),
        ("nutrition_recommendations", FieldKind::Object, false),
        ("final_recommendations", FieldKind::String, false),
        ("next_steps", FieldKind::Array, false),
    ]);

    let mut recovery = composition(
        "injury-recovery-protocol",
        "Injury Recovery Protocol",
        "Specialized composition for injury assessment and recovery planning",
        CompositionType::SequentialChain,
        vec![
            CompositionNode::new("initial_assessment", PHYSIOTHERAPY, AgentRole::Primary)
                .map_input("symptoms", "user_symptoms")
                .map_input("injury_history", "user_history")
                .map_output("assessment_result", "assessment"),
            CompositionNode::new("muscle_compensation_check", FABRIC_SENSOR, AgentRole::Validator)
                .map_input("exercise", "assessment_exercise")
                .map_input("stability_score", "baseline_stability")
                .map_output("compensation_patterns", "compensation_detected")
                .with_conditions(StepConditions {
                    require_success: vec!["initial_assessment".to_string()],
                    ..Default::default()
                }),
            CompositionNode::new("recovery_coaching", AI_COACH, AgentRole::Aggregator)
                .map_input("assessment_data", "initial_assessment.assessment_result")
                .map_input("muscle_data", "muscle_compensation_check.compensation_patterns")
                .map_input("current_exercise", "recovery_exercise")
                .map_output("recovery_plan", "coaching_message")
                .map_output("progressive_exercises", "form_corrections"),
        ],
        json!({
            "category": "rehabilitation",
            "complexity": "medium",
            "estimated_duration": 30,
            "target_users": ["injured_athletes", "rehabilitation_patients"]
        }),
    );
    recovery.input_shape = shape(&[
        ("user_symptoms", FieldKind::Array, true),
        ("user_history", FieldKind::Object, false),
        ("baseline_stability", FieldKind::Number, true),
        ("assessment_exercise", FieldKind::String, false),
        ("recovery_exercise", FieldKind::String, false),
    ]);
    recovery.output_shape = shape(&[
        ("assessment_result", FieldKind::String, false),
        ("compensation_patterns", FieldKind::Boolean, false),
        ("recovery_plan", FieldKind::String, false),
        ("progressive_exercises", FieldKind::Array, false),
    ]);

    let mut performance = composition(
        "realtime-performance-optimization",
        "Real-time Performance Optimization",
        "Live performance coaching with multiple feedback loops",
        CompositionType::FeedbackLoop,
        vec![
            CompositionNode::new("continuous_monitoring", FABRIC_SENSOR, AgentRole::Primary)
                .map_input("exercise", "current_exercise")
                .map_input("stability_score", "live_stability")
                .map_output("muscle_feedback", "muscle_zones")
                .map_output("compensation_alerts", "compensation_detected"),
            CompositionNode::new("instant_coaching", AI_COACH, AgentRole::Primary)
                .map_input("muscle_data", "continuous_monitoring.muscle_feedback")
                .map_input("current_exercise", "current_exercise")
                .map_input("user_profile", "athlete_profile")
                .map_output("live_feedback", "coaching_message")
                .map_output("form_adjustments", "form_corrections"),
        ],
        json!({
            "category": "performance",
            "complexity": "high",
            "estimated_duration": 60,
            "real_time": true,
            "target_users": ["athletes", "advanced_users"]
        }),
    );
    performance.input_shape = shape(&[
        ("current_exercise", FieldKind::String, true),
        ("live_stability", FieldKind::Number, true),
        ("athlete_profile", FieldKind::Object, false),
        ("session_duration", FieldKind::Number, false),
    ]);
    performance.output_shape = shape(&[
        ("muscle_feedback", FieldKind::Object, false),
        ("compensation_alerts", FieldKind::Boolean, false),
        ("live_feedback", FieldKind::String, false),
        ("form_adjustments", FieldKind::Array, false),
    ]);

    vec![wellness, recovery, performance]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_every_agent_is_backed_by_an_interface() {
        let interfaces: HashMap<String, CapabilityInterface> = interfaces()
            .into_iter()
            .map(|i| (i.agent_id.clone(), i))
            .collect();
        for agent in agents() {
            let interface = &interfaces[&agent.agent_id];
            for behavior in &agent.behaviors {
                assert!(interface.supports(&behavior.capability), "{}", behavior.capability);
            }
        }
    }

    #[test]
    fn test_catalog_sizes() {
        assert_eq!(workflows().len(), 3);
        assert_eq!(compositions().len(), 3);
        assert_eq!(interfaces().len(), 5);
    }
}
