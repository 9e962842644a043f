use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "pt-BR", alias = "pt", alias = "pt-br")]
    PtBr,
    #[serde(rename = "en", alias = "en-US", alias = "en-us")]
    En,
}

impl Locale {
    pub fn code(self) -> &'static str {
        match self {
            Self::PtBr => "pt-BR",
            Self::En => "en",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pt-br" | "pt" => Ok(Self::PtBr),
            "en" | "en-us" => Ok(Self::En),
            other => Err(format!("unsupported locale '{other}' (expected pt-BR or en)")),
        }
    }
}

/// Instruction sent with the image. Asks for the four fixed sections.
pub fn analysis_prompt(locale: Locale) -> &'static str {
    match locale {
        Locale::PtBr => {
            "Você é um especialista em diagnóstico por imagem.\n\
             Analise a imagem e responda em português conforme a estrutura:\n\
             \n\
             ### 1. Tipo de imagem e região\n\
             ### 2. Achados relevantes\n\
             ### 3. Avaliação diagnóstica\n\
             ### 4. Explicação em linguagem leiga\n"
        }
        Locale::En => {
            "You are a diagnostic imaging specialist.\n\
             Analyze the image and answer in English using this structure:\n\
             \n\
             ### 1. Image type and region\n\
             ### 2. Relevant findings\n\
             ### 3. Diagnostic assessment\n\
             ### 4. Plain-language explanation\n"
        }
    }
}

pub fn analysis_role(locale: Locale) -> &'static str {
    match locale {
        Locale::PtBr => "Especialista em imagens médicas. Responda em markdown.",
        Locale::En => "Medical imaging specialist. Answer in markdown.",
    }
}

pub fn research_instructions(locale: Locale) -> &'static str {
    match locale {
        Locale::PtBr => {
            "Pesquisador médico. Você busca informações complementares sobre achados da imagem médica.\n\
             Forneça fontes confiáveis (PubMed, WHO, etc.) com links e resumos."
        }
        Locale::En => {
            "Medical researcher. You look for complementary information about medical image findings.\n\
             Provide reliable sources (PubMed, WHO, etc.) with links and summaries."
        }
    }
}

pub fn research_prompt(locale: Locale, analysis: &str) -> String {
    match locale {
        Locale::PtBr => format!(
            "Com base na seguinte análise, realize uma pesquisa médica:\nResultado da análise: \"{analysis}\"\n"
        ),
        Locale::En => format!(
            "Based on the following analysis, perform a medical search:\nAnalysis result: \"{analysis}\"\n"
        ),
    }
}
