//! Prompt templates for the two-stage document chain.
//!
//! The templates are part of the contract with the model: stage 1 must
//! answer with a JSON array of category names from [`DOCUMENT_CATEGORIES`],
//! stage 2 with a JSON array of objects tagged by `document_type`. They are
//! kept verbatim in Portuguese because the category names double as the
//! values callers match on (e.g. `"Fatura de Energia"`).
//!
//! Callers can replace the whole chain via
//! [`crate::config::ChainConfigBuilder::stages`]; the constants here are used
//! only when no override is provided.

use serde::{Deserialize, Serialize};

/// Placeholder replaced by the previous stage's parsed output.
pub const DOCUMENTS_PLACEHOLDER: &str = "{documents}";

/// Controlled vocabulary for stage 1.
pub const DOCUMENT_CATEGORIES: &[&str] = &[
    "Carteira de Identidade com Foto",
    "Solicitação de Serviço de Despesa de Receita (SSDR)",
    "Solicitação de Abertura de Processo",
    "Documento Auxiliar de Nota Fiscal Eletrônica (DANFE)",
    "Documento de Arrecadação Estadual (DAE)",
    "Comprovante de Residência",
    "Declaração de Residência",
    "Fatura de Água e/ou Esgoto",
    "Fatura de Energia",
    "Fatura de Serviços de Comunicação",
    "Laudo de Vistoria",
    "Certificado de Registro do Veículo (CRV)",
    "Autorização para Transferência de Propriedade do Veículo (ATPV)",
    "Autorização Profissional",
    "Procuração",
    "Conselho Regional de Despachante Documentalista (CRDD)",
];

/// Escape category: the image is too poor to identify a document.
pub const NOT_IDENTIFIED: &str = "Não Identificado";

/// Escape category: a document was recognised but is outside the vocabulary.
pub const OTHER_DOCUMENT: &str = "Outro documento";

/// Stage 1: classify every document visible in the image.
pub const CLASSIFICATION_PROMPT: &str = r#"Você é um assistente de classificação de documentos. Dada uma imagem digitalizada ou fotografia contendo um ou mais documentos, sua tarefa é descobrir a qual categoria cada documento pertence na lista fornecida em <categoria-documentos>. Respeite as restrições em <obs> e retorne a resposta no formato de <output>, como demonstrado em <exemplos>.

<categoria-documentos>
Carteira de Identidade com Foto
Solicitação de Serviço de Despesa de Receita (SSDR)
Solicitação de Abertura de Processo
Documento Auxiliar de Nota Fiscal Eletrônica (DANFE)
Documento de Arrecadação Estadual (DAE)
Comprovante de Residência
Declaração de Residência
Fatura de Água e/ou Esgoto
Fatura de Energia
Fatura de Serviços de Comunicação
Laudo de Vistoria
Certificado de Registro do Veículo (CRV)
Autorização para Transferência de Propriedade do Veículo (ATPV)
Autorização Profissional
Procuração
Conselho Regional de Despachante Documentalista (CRDD)
</categoria-documentos>

<obs>
Se a qualidade da imagem não permitir a identificação clara de um documento, classifique-o como "Não Identificado".
Caso um documento identificado não se enquadre nas categorias listadas, classifique-o como "Outro documento".
</obs>

<output>Um array JSON de strings, uma por documento encontrado. Se nenhum documento for encontrado, retorne [].</output>

<exemplos>
    <exemplo-1>
        Entrada: Imagem contendo uma Carteira de Identidade e um documento fora da lista
        Saída: ["Carteira de Identidade com Foto", "Outro documento"]
    </exemplo-1>
    <exemplo-2>
        Entrada: Imagem contendo um documento com informações de uma fatura de energia elétrica
        Saída: ["Fatura de Energia"]
    </exemplo-2>
</exemplos>
"#;

/// Stage 2: extract fields for each document classified by stage 1.
///
/// Contains [`DOCUMENTS_PLACEHOLDER`], which the chain runner replaces with
/// the canonical JSON of stage 1's array.
pub const EXTRACTION_PROMPT: &str = r#"Você é um assistente de extração de informações. Dada uma imagem e uma lista de tipos de documentos identificados nessa imagem, sua tarefa é extrair informações relevantes desses documentos.

**Instruções:**

*   **Entrada:** Você receberá uma imagem e uma lista de tipos de documentos identificados na imagem.
*   **Extração:** Para cada tipo de documento na lista, tente extrair as seguintes informações, se presentes:
    *   Nome
    *   Rua
    *   Bairro
    *   Cidade
    *   Estado
    *   CEP
    *   CPF
    *   CNPJ
    *   Telefone
    *   E-mail
*   **Priorização:** Priorize a extração precisa dos dados. Se a qualidade da imagem dificultar a extração de um campo específico, omita-o. Não invente informações.
*   **Formatação da Saída:** Retorne um array JSON. Para cada documento identificado, crie um objeto JSON com os seguintes campos:
    *   `document_type`: O tipo do documento (ex: "Carteira de Identidade com Foto", "Fatura de Energia").
    *   Os demais campos (nome, rua, etc.) com os valores extraídos. Inclua apenas os campos para os quais você conseguiu extrair informações.
*   **Múltiplos Documentos do Mesmo Tipo:** Se houver múltiplos documentos do mesmo tipo na imagem, crie um objeto JSON separado para cada um.
*   **Nenhum Documento Identificado:** Se a lista de documentos for vazia, retorne um array JSON vazio (`[]`).

**Exemplo:**

**Tipos de Documentos Identificados:** ["Carteira de Identidade com Foto", "Fatura de Energia"]

**Saída:**
```json
[
    {
        "document_type": "Carteira de Identidade com Foto",
        "nome": "João da Silva",
        "cpf": "123.456.789-00",
        "data_nascimento": "01/01/1980"
    },
    {
        "document_type": "Fatura de Energia",
        "nome": "Maria Souza",
        "rua": "Avenida Paulista, 1000",
        "cidade": "São Paulo",
        "estado": "SP",
        "cep": "01311-920"
    }
]
```

**Lista de documentos a serem processados:**
{documents}
"#;

/// One step of the chain: a named, immutable prompt template.
///
/// Stages are identified by their 1-based position in
/// [`crate::config::ChainConfig::stages`]; `name` is only for logs and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptStage {
    pub name: String,
    pub template: String,
}

impl PromptStage {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }

    /// Whether this stage consumes the previous stage's output.
    pub fn uses_carry(&self) -> bool {
        self.template.contains(DOCUMENTS_PLACEHOLDER)
    }

    /// Render the prompt for this stage.
    ///
    /// `carry` is serialised as compact JSON so the text the model sees does
    /// not depend on how a particular language prints lists. Templates
    /// without the placeholder are returned unchanged.
    pub fn render(&self, carry: &[serde_json::Value]) -> String {
        if !self.uses_carry() {
            return self.template.clone();
        }
        let json = serde_json::Value::Array(carry.to_vec()).to_string();
        self.template.replace(DOCUMENTS_PLACEHOLDER, &json)
    }
}

/// The built-in two-stage chain: classification, then extraction.
pub fn default_stages() -> Vec<PromptStage> {
    vec![
        PromptStage::new("classification", CLASSIFICATION_PROMPT),
        PromptStage::new("extraction", EXTRACTION_PROMPT),
    ]
}
