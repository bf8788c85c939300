//! 医疗回答生成
//!
//! 优先通过生成模型作答；模型不可用或调用失败时，使用内置小型知识库、
//! 角色与专科提示拼出离线回答。两条路径都保证回答带有免责声明。

use std::sync::Arc;

use crate::provider::ChatProvider;

pub const MEDICAL_DISCLAIMER: &str = "⚠️ **Important Disclaimer:** This information is for educational purposes only and should not replace professional medical advice, diagnosis, or treatment. Always consult with qualified healthcare professionals.";

/// 离线知识库最多返回的条目数
pub const MAX_KB_MATCHES: usize = 3;

/// (类别, 条目, 说明)
const KNOWLEDGE_BASE: &[(&str, &str, &str)] = &[
    ("symptoms", "fever", "Fever is a temporary increase in body temperature, often due to illness. Normal body temperature is around 98.6°F (37°C)."),
    ("symptoms", "headache", "Headache is pain in the head or upper neck. Common types include tension headaches, migraines, and cluster headaches."),
    ("symptoms", "cough", "Cough is a sudden expulsion of air from the lungs. It can be dry or productive (bringing up mucus)."),
    ("symptoms", "fatigue", "Fatigue is extreme tiredness that doesn't improve with rest. It can be caused by various medical conditions."),
    ("symptoms", "nausea", "Nausea is a feeling of sickness with an inclination to vomit. It can be caused by infections, medications, and pregnancy."),
    ("symptoms", "dizziness", "Dizziness is a sensation of lightheadedness or unsteadiness. It can be caused by inner ear problems, low blood pressure, or neurological conditions."),
    ("symptoms", "chest pain", "Chest pain can have many causes, from muscle strain to serious heart conditions. Any unexplained chest pain should be evaluated by a healthcare provider."),
    ("symptoms", "shortness of breath", "Shortness of breath, or dyspnea, is difficulty breathing. It can be caused by respiratory, cardiac, or other medical conditions."),
    ("conditions", "hypertension", "Hypertension (high blood pressure) is a common condition that affects the arteries. It's often called the 'silent killer' because it usually has no symptoms."),
    ("conditions", "diabetes", "Diabetes is a chronic disease that affects how your body turns food into energy. There are two main types: Type 1 and Type 2."),
    ("conditions", "asthma", "Asthma is a condition that affects the airways in the lungs. It can cause wheezing, shortness of breath, chest tightness, and coughing."),
    ("conditions", "pneumonia", "Pneumonia is an infection that inflames the air sacs in one or both lungs. It can be caused by bacteria, viruses, or fungi."),
    ("conditions", "heart disease", "Heart disease refers to various conditions affecting the heart, including coronary artery disease, heart failure, and arrhythmias."),
    ("conditions", "arthritis", "Arthritis is inflammation of the joints, causing pain and stiffness. The most common types are osteoarthritis and rheumatoid arthritis."),
    ("conditions", "depression", "Depression is a mental health disorder characterized by persistently depressed mood or loss of interest in activities."),
    ("conditions", "anxiety", "Anxiety disorders involve excessive fear or worry that can interfere with daily activities and relationships."),
    ("medications", "aspirin", "Aspirin is a common medication used to treat pain, fever, and inflammation. It's also used to prevent heart attacks and strokes."),
    ("medications", "ibuprofen", "Ibuprofen is a nonsteroidal anti-inflammatory drug (NSAID) used to reduce fever and treat pain or inflammation."),
    ("medications", "acetaminophen", "Acetaminophen is used to treat pain and reduce fever. It's generally safe when used as directed."),
    ("medications", "antibiotics", "Antibiotics are medications that fight bacterial infections. They don't work against viral infections like colds or flu."),
    ("medications", "insulin", "Insulin is a hormone that helps control blood sugar levels. It's essential for people with Type 1 diabetes and some with Type 2."),
    ("medications", "statins", "Statins are medications that help lower cholesterol levels in the blood, reducing the risk of heart disease and stroke."),
    ("procedures", "blood test", "Blood tests can check for various conditions, monitor organ function, and assess overall health. Common types include CBC, metabolic panels, and lipid profiles."),
    ("procedures", "x-ray", "X-rays use radiation to create images of bones and some soft tissues. They're commonly used to diagnose fractures, pneumonia, and other conditions."),
    ("procedures", "mri", "MRI (Magnetic Resonance Imaging) uses magnetic fields and radio waves to create detailed images of organs and tissues."),
    ("procedures", "ct scan", "CT scans use X-rays and computer technology to create cross-sectional images of the body, useful for diagnosing various conditions."),
];

/// 常见主题的要点：(触发词, 标题, 要点)
const TOPIC_KEY_POINTS: &[(&[&str], &str, &[&str])] = &[
    (
        &["fever", "temperature"],
        "Fever",
        &[
            "Normal body temperature is around 98.6°F (37°C)",
            "Fever is often a sign of infection or inflammation",
            "Monitor for other symptoms that accompany fever",
            "Seek medical attention for high fevers (>103°F/39.4°C) or persistent fevers",
        ],
    ),
    (
        &["headache", "head pain", "migraine"],
        "Headaches",
        &[
            "Tension headaches are the most common type",
            "Migraines often have specific triggers and symptoms",
            "Sudden, severe headaches require immediate medical attention",
            "Keep a headache diary to identify patterns",
        ],
    ),
    (
        &["cough", "cold", "respiratory"],
        "Respiratory Symptoms",
        &[
            "Dry vs. productive cough have different implications",
            "Most colds resolve within 7-10 days",
            "Persistent cough may indicate underlying conditions",
            "Monitor for difficulty breathing or chest pain",
        ],
    ),
    (
        &["hypertension", "blood pressure"],
        "Hypertension",
        &[
            "Often called the 'silent killer' due to lack of symptoms",
            "Regular monitoring is essential",
            "Lifestyle modifications can help control blood pressure",
            "Medication may be necessary for some individuals",
        ],
    ),
    (
        &["diabetes", "blood sugar", "glucose"],
        "Diabetes",
        &[
            "Type 1: Autoimmune, requires insulin",
            "Type 2: Often lifestyle-related, may be managed with diet/exercise",
            "Regular blood sugar monitoring is crucial",
            "Complications can affect multiple organ systems",
        ],
    ),
];

/// 检索知识库
///
/// 条目名作为完整词组出现在问题中，或整个问题作为完整词组出现在条目名/说明中，即视为命中。
pub fn search_knowledge_base(query: &str) -> Vec<String> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Vec::new();
    }

    KNOWLEDGE_BASE
        .iter()
        .filter(|(_, key, text)| {
            contains_phrase(&query, key)
                || contains_phrase(key, &query)
                || contains_phrase(&text.to_lowercase(), &query)
        })
        .take(MAX_KB_MATCHES)
        .map(|(_, key, text)| format!("{}: {}", title_case(key), text))
        .collect()
}

/// 按词边界匹配，避免 "mri" 命中 "primary"
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    regex::Regex::new(&format!(r"\b{}\b", regex::escape(phrase)))
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

fn title_case(key: &str) -> String {
    key.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn role_guidance(role: &str) -> &'static str {
    match role.trim().to_lowercase().as_str() {
        "physician" | "doctor" | "nurse" => {
            "**Professional Context:** As a healthcare professional, you're likely familiar with these concepts. Remember to always follow your institution's protocols and guidelines, and consider the latest clinical evidence in your practice."
        }
        "medical student" | "student" => {
            "**Educational Context:** As a medical student, this information can help with your studies. Always verify information with your professors and clinical supervisors, and use this as a starting point for further research."
        }
        "patient" => {
            "**Patient Context:** As a patient, this information is for educational purposes only. Please discuss any concerns with your healthcare provider, and don't make treatment decisions based solely on this information."
        }
        _ => {
            "**General Context:** This information is provided for educational purposes. Always consult with qualified healthcare professionals for medical advice."
        }
    }
}

fn specialty_guidance(specialty: Option<&str>) -> Option<&'static str> {
    let specialty = specialty?.trim().to_lowercase();
    match specialty.as_str() {
        "cardiology" | "cardiac" => Some(
            "**Cardiology Perspective:** Given your interest in cardiology, consider how this information relates to cardiovascular health and patient care. Many conditions can have cardiac implications.",
        ),
        "pediatrics" | "pediatric" => Some(
            "**Pediatric Perspective:** In pediatric care, remember that children may present differently than adults and may require specialized approaches. Consider age-appropriate considerations.",
        ),
        "emergency" | "er" => Some(
            "**Emergency Medicine Perspective:** In emergency settings, rapid assessment and intervention are crucial. Consider the urgency and severity of presenting symptoms.",
        ),
        _ => None,
    }
}

fn general_opening(question: &str) -> &'static str {
    if question.contains("what is") || question.contains("define") {
        "I understand you're asking about a medical topic. While I don't have specific information about this particular condition or symptom, I can provide some general guidance."
    } else if question.contains("how to") || question.contains("treatment") {
        "I understand you're asking about treatment or management of a medical condition. This is an area where professional medical advice is particularly important."
    } else if question.contains("symptom") || question.contains("sign") {
        "I understand you're asking about symptoms or signs of a medical condition. Remember that symptoms can vary between individuals and may indicate different conditions."
    } else {
        "Thank you for your medical question. While I can provide general information, it's important to consult with healthcare professionals for personalized medical advice."
    }
}

/// 离线回答
pub fn offline_response(question: &str, role: &str, specialty: Option<&str>) -> String {
    let lowered = question.to_lowercase();
    let mut parts: Vec<String> = Vec::new();

    let matches = search_knowledge_base(question);
    if matches.is_empty() {
        parts.push(general_opening(&lowered).to_string());
    } else {
        parts.push(format!(
            "Based on your question about medical topics, here's what I found:\n\n{}",
            matches.join("\n\n")
        ));

        let topic = TOPIC_KEY_POINTS
            .iter()
            .find(|(triggers, _, _)| triggers.iter().any(|t| lowered.contains(t)));
        if let Some((_, heading, points)) = topic {
            let bullets: Vec<String> = points.iter().map(|p| format!("• {}", p)).collect();
            parts.push(format!("**Key Points about {}:**\n{}", heading, bullets.join("\n")));
        }
    }

    parts.push(role_guidance(role).to_string());
    if let Some(guidance) = specialty_guidance(specialty) {
        parts.push(guidance.to_string());
    }
    parts.push(MEDICAL_DISCLAIMER.to_string());

    parts.join("\n\n")
}

/// 没有提到免责或就医建议的回答补上免责声明
pub fn ensure_disclaimer(reply: &str) -> String {
    let lowered = reply.to_lowercase();
    if lowered.contains("disclaimer") || lowered.contains("consult") {
        reply.to_string()
    } else {
        format!("{}\n\n{}", reply, MEDICAL_DISCLAIMER)
    }
}

/// 医疗回答生成器
pub struct ResponseGenerator {
    provider: Arc<dyn ChatProvider>,
}

impl ResponseGenerator {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    fn prompt(question: &str, role: &str, specialty: Option<&str>, context: &str) -> String {
        let specialty = specialty.filter(|s| !s.trim().is_empty()).unwrap_or("General");
        let context = if context.trim().is_empty() {
            "No previous context"
        } else {
            context
        };

        format!(
            "You are a knowledgeable medical AI assistant. Provide a comprehensive, accurate, and helpful response to this medical question.\n\
             **User Role:** {role}\n\
             **User Specialty:** {specialty}\n\
             **Medical Context:** {context}\n\
             **Question:** {question}\n\
             **Instructions:**\n\
             1. Provide a detailed, medically accurate response.\n\
             2. Consider the user's role and specialty.\n\
             3. Include relevant medical information and guidance.\n\
             4. Mention when professional medical consultation is needed.\n\
             5. Use clear, professional language.\n\
             6. Include appropriate medical disclaimers.\n\
             **Response Format:**\n\
             - Start with a direct answer to the question.\n\
             - Provide relevant medical information.\n\
             - Include role-specific guidance.\n\
             - Add appropriate warnings and disclaimers.\n\
             - Keep the response comprehensive but focused.\n\
             Remember: This is for educational purposes only. Always emphasize consulting healthcare professionals for medical advice."
        )
    }

    /// 生成回答，永不失败
    pub async fn generate(
        &self,
        question: &str,
        role: &str,
        specialty: Option<&str>,
        context: &str,
    ) -> String {
        if self.provider.is_available() {
            let prompt = Self::prompt(question, role, specialty, context);
            match self.provider.complete(None, &prompt).await {
                Ok(reply) if !reply.trim().is_empty() => {
                    tracing::info!(
                        "Response generated via {}, {} characters",
                        self.provider.name(),
                        reply.len()
                    );
                    return ensure_disclaimer(reply.trim());
                }
                Ok(_) => tracing::warn!("Empty response from {}", self.provider.name()),
                Err(e) => tracing::warn!("Response generation via {} failed: {}", self.provider.name(), e),
            }
        }

        tracing::info!("Using offline response");
        offline_response(question, role, specialty)
    }
}
