//! Domain entities produced by an extraction call.
//!
//! Entities are assembled through [`ProcessoJudicialBuilder`] and are
//! read-only afterwards; the caller owns the returned record.

use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::tribunais::SistemaOrigem;
use crate::utils::{normalizar_cnpj, normalizar_cpf};

/// Procedural status reported by the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusProcesso {
    Ativo,
    Arquivado,
    ArquivadoProvisoriamente,
    Suspenso,
    Tramitando,
    #[default]
    Desconhecido,
}

impl StatusProcesso {
    /// Infers the status from a free-text situation field. Input must already
    /// be folded with [`crate::utils::dobrar_texto`].
    pub fn inferir(texto_dobrado: &str) -> Self {
        if texto_dobrado.contains("arquivado provisoriamente")
            || texto_dobrado.contains("arquivamento provisorio")
        {
            StatusProcesso::ArquivadoProvisoriamente
        } else if texto_dobrado.contains("arquivado") || texto_dobrado.contains("baixado") {
            StatusProcesso::Arquivado
        } else if texto_dobrado.contains("suspens") || texto_dobrado.contains("sobrestado") {
            StatusProcesso::Suspenso
        } else if texto_dobrado.contains("tramit") || texto_dobrado.contains("em andamento") {
            StatusProcesso::Tramitando
        } else if texto_dobrado
            .split(|c: char| !c.is_alphanumeric())
            .any(|palavra| palavra == "ativo")
        {
            StatusProcesso::Ativo
        } else {
            StatusProcesso::Desconhecido
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TipoParte {
    Autor,
    Reu,
    Terceiro,
}

/// Tax identifier of a party: a CPF or a CNPJ, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "tipo", content = "numero", rename_all = "UPPERCASE")]
pub enum DocumentoParte {
    Cpf(String),
    Cnpj(String),
}

impl DocumentoParte {
    /// Validates and stores the identifier digits-only. Returns `None` for
    /// anything that is neither a valid CPF nor a valid CNPJ.
    pub fn identificar(raw: &str) -> Option<Self> {
        normalizar_cpf(raw)
            .map(DocumentoParte::Cpf)
            .or_else(|| normalizar_cnpj(raw).map(DocumentoParte::Cnpj))
    }

    pub fn numero(&self) -> &str {
        match self {
            DocumentoParte::Cpf(n) | DocumentoParte::Cnpj(n) => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parte {
    pub tipo: TipoParte,
    pub nome: String,
    pub documento: Option<DocumentoParte>,
}

impl Parte {
    pub fn new(tipo: TipoParte, nome: impl Into<String>) -> Self {
        Self {
            tipo,
            nome: nome.into(),
            documento: None,
        }
    }

    pub fn with_documento(mut self, documento: Option<DocumentoParte>) -> Self {
        self.documento = documento;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Movimentacao {
    pub data: Option<NaiveDate>,
    pub descricao: String,
}

/// A document attached to the process. `hash` identifies it for dedup and
/// cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Documento {
    pub nome: String,
    pub tipo: String,
    pub url_ou_caminho: String,
    pub hash: String,
}

impl Documento {
    /// Identity derived from the document's descriptor when its content has
    /// not been downloaded.
    pub fn new(
        nome: impl Into<String>,
        tipo: impl Into<String>,
        url_ou_caminho: impl Into<String>,
    ) -> Self {
        let nome = nome.into();
        let tipo = tipo.into();
        let url_ou_caminho = url_ou_caminho.into();
        let hash = sha256_hex(format!("{nome}|{tipo}|{url_ou_caminho}").as_bytes());
        Self {
            nome,
            tipo,
            url_ou_caminho,
            hash,
        }
    }

    /// Identity derived from the document bytes.
    pub fn with_content(mut self, content: &[u8]) -> Self {
        self.hash = sha256_hex(content);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Advogado {
    pub nome: String,
    pub oab_numero: Option<String>,
    pub oab_estado: Option<String>,
}

impl Advogado {
    pub fn new(nome: impl Into<String>) -> Self {
        Self {
            nome: nome.into(),
            oab_numero: None,
            oab_estado: None,
        }
    }

    pub fn with_oab(mut self, estado: impl Into<String>, numero: impl Into<String>) -> Self {
        self.oab_estado = Some(estado.into().to_uppercase());
        self.oab_numero = Some(numero.into());
        self
    }
}

impl fmt::Display for Advogado {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.oab_estado, &self.oab_numero) {
            (Some(uf), Some(numero)) => write!(f, "{} (OAB/{uf} {numero})", self.nome),
            _ => f.write_str(&self.nome),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intimacao {
    pub data: Option<NaiveDate>,
    pub destinatario: String,
    pub descricao: String,
    pub prazo_dias: Option<u32>,
}

/// Normalised record of one judicial process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessoJudicial {
    numero_processo: String,
    tribunal: String,
    sistema_origem: SistemaOrigem,
    status: StatusProcesso,
    comarca: Option<String>,
    vara: Option<String>,
    classe: Option<String>,
    valor_causa: Option<f64>,
    data_distribuicao: Option<NaiveDate>,
    segredo_justica: bool,
    partes: Vec<Parte>,
    movimentacoes: Vec<Movimentacao>,
    documentos: Vec<Documento>,
    advogados: Vec<Advogado>,
    intimacoes: Vec<Intimacao>,
}

impl ProcessoJudicial {
    pub fn builder(
        numero_processo: impl Into<String>,
        tribunal: impl Into<String>,
        sistema_origem: SistemaOrigem,
    ) -> ProcessoJudicialBuilder {
        ProcessoJudicialBuilder::new(numero_processo, tribunal, sistema_origem)
    }

    pub fn numero_processo(&self) -> &str {
        &self.numero_processo
    }

    pub fn tribunal(&self) -> &str {
        &self.tribunal
    }

    pub fn sistema_origem(&self) -> SistemaOrigem {
        self.sistema_origem
    }

    pub fn status(&self) -> StatusProcesso {
        self.status
    }

    pub fn comarca(&self) -> Option<&str> {
        self.comarca.as_deref()
    }

    pub fn vara(&self) -> Option<&str> {
        self.vara.as_deref()
    }

    pub fn classe(&self) -> Option<&str> {
        self.classe.as_deref()
    }

    pub fn valor_causa(&self) -> Option<f64> {
        self.valor_causa
    }

    pub fn data_distribuicao(&self) -> Option<NaiveDate> {
        self.data_distribuicao
    }

    pub fn segredo_justica(&self) -> bool {
        self.segredo_justica
    }

    pub fn partes(&self) -> &[Parte] {
        &self.partes
    }

    pub fn movimentacoes(&self) -> &[Movimentacao] {
        &self.movimentacoes
    }

    pub fn documentos(&self) -> &[Documento] {
        &self.documentos
    }

    pub fn advogados(&self) -> &[Advogado] {
        &self.advogados
    }

    pub fn intimacoes(&self) -> &[Intimacao] {
        &self.intimacoes
    }

    /// JSON view with ISO-8601 dates and plain-float monetary values.
    pub fn to_dict(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Accumulates extracted fields; [`build`](Self::build) freezes the record.
#[derive(Debug, Clone)]
pub struct ProcessoJudicialBuilder {
    inner: ProcessoJudicial,
}

impl ProcessoJudicialBuilder {
    pub fn new(
        numero_processo: impl Into<String>,
        tribunal: impl Into<String>,
        sistema_origem: SistemaOrigem,
    ) -> Self {
        Self {
            inner: ProcessoJudicial {
                numero_processo: numero_processo.into(),
                tribunal: tribunal.into(),
                sistema_origem,
                status: StatusProcesso::Desconhecido,
                comarca: None,
                vara: None,
                classe: None,
                valor_causa: None,
                data_distribuicao: None,
                segredo_justica: false,
                partes: Vec::new(),
                movimentacoes: Vec::new(),
                documentos: Vec::new(),
                advogados: Vec::new(),
                intimacoes: Vec::new(),
            },
        }
    }

    pub fn status(mut self, status: StatusProcesso) -> Self {
        self.inner.status = status;
        self
    }

    pub fn comarca(mut self, comarca: Option<String>) -> Self {
        self.inner.comarca = comarca;
        self
    }

    pub fn vara(mut self, vara: Option<String>) -> Self {
        self.inner.vara = vara;
        self
    }

    pub fn classe(mut self, classe: Option<String>) -> Self {
        self.inner.classe = classe;
        self
    }

    pub fn valor_causa(mut self, valor: Option<f64>) -> Self {
        self.inner.valor_causa = valor;
        self
    }

    pub fn data_distribuicao(mut self, data: Option<NaiveDate>) -> Self {
        self.inner.data_distribuicao = data;
        self
    }

    pub fn segredo_justica(mut self, segredo: bool) -> Self {
        self.inner.segredo_justica = segredo;
        self
    }

    pub fn parte(mut self, parte: Parte) -> Self {
        self.inner.partes.push(parte);
        self
    }

    pub fn movimentacao(mut self, movimentacao: Movimentacao) -> Self {
        self.inner.movimentacoes.push(movimentacao);
        self
    }

    pub fn documento(mut self, documento: Documento) -> Self {
        self.inner.documentos.push(documento);
        self
    }

    pub fn advogado(mut self, advogado: Advogado) -> Self {
        self.inner.advogados.push(advogado);
        self
    }

    pub fn intimacao(mut self, intimacao: Intimacao) -> Self {
        self.inner.intimacoes.push(intimacao);
        self
    }

    /// Orders the timeline oldest-first (undated entries keep their relative
    /// position at the end) and drops duplicate documents and lawyers.
    pub fn build(mut self) -> ProcessoJudicial {
        self.inner
            .movimentacoes
            .sort_by_key(|mov| (mov.data.is_none(), mov.data));

        let mut seen_hashes = std::collections::HashSet::new();
        self.inner
            .documentos
            .retain(|doc| seen_hashes.insert(doc.hash.clone()));

        let mut seen_lawyers = std::collections::HashSet::new();
        self.inner.advogados.retain(|adv| {
            seen_lawyers.insert((
                crate::utils::dobrar_texto(&adv.nome),
                adv.oab_estado.clone(),
                adv.oab_numero.clone(),
            ))
        });

        self.inner
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
